//! Mediation layer: the only path from a skill to the outside world.
//!
//! Skills receive an [`McpSession`] bound to one correlation id. The session
//! exposes exactly two operations, `invoke_tool` and `read_resource`; the
//! backend itself is never reachable from skill code. Each call is audited
//! before and after, bounded by a timeout, and recorded in the session's
//! tool-usage log.
//!
//! Side-effecting tools are deduplicated here: the first successful result
//! for a `(tool, idempotency_key)` pair is cached and replayed for every
//! later call with the same pair. Concurrent callers with the same pair are
//! serialised on a per-key lock, so the backend sees at most one effect.
//! Cached results are replayed for `idempotency_ttl`; the cache holds at most
//! `idempotency_capacity` idle keys and sheds the least recently used first.

pub mod error;
pub mod registry;
pub mod scripted;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::audit::AuditEmitter;
use crate::config::MediationConfig;
use crate::domain::{CallKind, ToolUsageEntry};

pub use error::{McpFailure, McpFailureKind, McpResult};
pub use registry::{DuplicateTool, JsonFieldSchema, ToolRegistry, ToolSpec};

/// Transport-agnostic backend that actually performs tool calls and reads.
#[async_trait]
pub trait McpBackend: Send + Sync {
    async fn invoke_tool(
        &self,
        tool_name: &str,
        params: &Value,
        idempotency_key: Option<&str>,
    ) -> McpResult<Value>;

    async fn read_resource(&self, uri: &str) -> McpResult<Value>;
}

type IdempotencySlot = Arc<tokio::sync::Mutex<Option<Value>>>;

struct CachedSlot {
    slot: IdempotencySlot,
    touched: Instant,
}

impl CachedSlot {
    /// No caller holds the slot outside the cache.
    fn idle(&self) -> bool {
        Arc::strong_count(&self.slot) == 1
    }
}

pub struct MediationLayer {
    backend: Arc<dyn McpBackend>,
    tools: ToolRegistry,
    audit: AuditEmitter,
    call_timeout: Duration,
    idempotency_ttl: Duration,
    idempotency_capacity: usize,
    idempotency: Mutex<HashMap<(String, String), CachedSlot>>,
}

impl MediationLayer {
    pub fn new(
        backend: Arc<dyn McpBackend>,
        tools: ToolRegistry,
        audit: AuditEmitter,
        config: &MediationConfig,
    ) -> Self {
        Self {
            backend,
            tools,
            audit,
            call_timeout: config.call_timeout(),
            idempotency_ttl: config.idempotency_ttl(),
            idempotency_capacity: config.idempotency_capacity.max(1),
            idempotency: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Open a session for one skill invocation.
    pub fn session(self: &Arc<Self>, correlation_id: &str, skill_name: &str) -> McpSession {
        McpSession {
            layer: Arc::clone(self),
            correlation_id: correlation_id.to_string(),
            skill_name: skill_name.to_string(),
            usage: Mutex::new(Vec::new()),
        }
    }

    fn slot(&self, tool_name: &str, key: &str) -> IdempotencySlot {
        let now = Instant::now();
        let ttl = self.idempotency_ttl;
        let mut slots = self.idempotency.lock().unwrap_or_else(|e| e.into_inner());
        let id = (tool_name.to_string(), key.to_string());

        if let Some(cached) = slots.get_mut(&id) {
            if cached.idle() && now.duration_since(cached.touched) >= ttl {
                cached.slot = IdempotencySlot::default();
            }
            cached.touched = now;
            return Arc::clone(&cached.slot);
        }

        if slots.len() >= self.idempotency_capacity {
            slots.retain(|_, c| !(c.idle() && now.duration_since(c.touched) >= ttl));
            let mut idle: Vec<((String, String), Instant)> = slots
                .iter()
                .filter(|(_, c)| c.idle())
                .map(|(k, c)| (k.clone(), c.touched))
                .collect();
            let excess = (slots.len() + 1).saturating_sub(self.idempotency_capacity);
            idle.sort_by_key(|(_, touched)| *touched);
            for (k, _) in idle.into_iter().take(excess) {
                slots.remove(&k);
            }
        }

        let slot = IdempotencySlot::default();
        slots.insert(
            id,
            CachedSlot {
                slot: Arc::clone(&slot),
                touched: now,
            },
        );
        slot
    }

    /// Idempotency keys currently cached.
    pub fn cached_keys(&self) -> usize {
        self.idempotency.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn call_backend(
        &self,
        tool_name: &str,
        params: &Value,
        idempotency_key: Option<&str>,
    ) -> McpResult<Value> {
        let call = self.backend.invoke_tool(tool_name, params, idempotency_key);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(McpFailure::timeout(format!(
                "tool '{tool_name}' exceeded {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    /// Returns the result and whether it was replayed from the cache.
    async fn dispatch_tool(
        &self,
        tool_name: &str,
        params: &Value,
        idempotency_key: Option<&str>,
    ) -> (McpResult<Value>, bool) {
        let spec = match self.tools.admit(tool_name, params, idempotency_key) {
            Ok(spec) => spec,
            Err(e) => return (Err(e), false),
        };

        let key = match (spec.side_effecting, idempotency_key) {
            (true, Some(key)) => key,
            _ => return (self.call_backend(tool_name, params, idempotency_key).await, false),
        };

        let slot = self.slot(tool_name, key);
        let mut cached = slot.lock().await;
        if let Some(value) = cached.as_ref() {
            return (Ok(value.clone()), true);
        }
        let result = self.call_backend(tool_name, params, Some(key)).await;
        if let Ok(value) = &result {
            *cached = Some(value.clone());
        }
        (result, false)
    }

    async fn read(&self, uri: &str) -> McpResult<Value> {
        match tokio::time::timeout(self.call_timeout, self.backend.read_resource(uri)).await {
            Ok(result) => result,
            Err(_) => Err(McpFailure::timeout(format!(
                "resource '{uri}' exceeded {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }
}

/// Per-invocation handle given to a skill.
pub struct McpSession {
    layer: Arc<MediationLayer>,
    correlation_id: String,
    skill_name: String,
    usage: Mutex<Vec<ToolUsageEntry>>,
}

impl McpSession {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Emit a skill-scoped audit event, `skill.<name>.<suffix>`.
    pub fn emit(&self, suffix: &str, payload: Value) {
        self.layer.audit.emit(
            format!("skill.{}.{}", self.skill_name, suffix),
            &self.correlation_id,
            payload,
        );
    }

    pub async fn invoke_tool(
        &self,
        tool_name: &str,
        params: Value,
        idempotency_key: Option<&str>,
    ) -> McpResult<Value> {
        self.emit(
            "mcp_call",
            json!({ "tool": tool_name, "idempotency_key": idempotency_key }),
        );
        let started = Instant::now();
        let (result, replayed) = self
            .layer
            .dispatch_tool(tool_name, &params, idempotency_key)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.record(
            CallKind::Tool,
            tool_name,
            idempotency_key,
            &result,
            replayed,
            duration_ms,
        );
        match &result {
            Ok(_) => self.emit(
                "mcp_call.complete",
                json!({ "tool": tool_name, "replayed": replayed, "duration_ms": duration_ms }),
            ),
            Err(e) => self.emit(
                "mcp_call.failure",
                json!({ "tool": tool_name, "kind": e.kind, "message": e.message }),
            ),
        }
        result
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.emit("mcp_query", json!({ "resource": uri }));
        let started = Instant::now();
        let result = self.layer.read(uri).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.record(CallKind::Resource, uri, None, &result, false, duration_ms);
        match &result {
            Ok(_) => self.emit(
                "mcp_query.complete",
                json!({ "resource": uri, "duration_ms": duration_ms }),
            ),
            Err(e) => self.emit(
                "mcp_query.failure",
                json!({ "resource": uri, "kind": e.kind, "message": e.message }),
            ),
        }
        result
    }

    /// Every call made so far, in completion order.
    pub fn tool_usage(&self) -> Vec<ToolUsageEntry> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn into_tool_usage(self) -> Vec<ToolUsageEntry> {
        self.usage.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn record(
        &self,
        kind: CallKind,
        target: &str,
        idempotency_key: Option<&str>,
        result: &McpResult<Value>,
        replayed: bool,
        duration_ms: u64,
    ) {
        let entry = ToolUsageEntry {
            kind,
            target: target.to_string(),
            idempotency_key: idempotency_key.map(str::to_string),
            success: result.is_ok(),
            replayed,
            duration_ms,
            error_code: result.as_ref().err().map(|e| e.kind.error_code()),
        };
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediation::scripted::ScriptedBackend;
    use chimera_state::fakes::MemoryAuditLedger;
    use chimera_state::AuditLedger;

    async fn layer(backend: Arc<ScriptedBackend>) -> (Arc<MediationLayer>, Arc<MemoryAuditLedger>) {
        layer_with(
            backend,
            MediationConfig {
                call_timeout_ms: 50,
                ..MediationConfig::default()
            },
        )
    }

    fn layer_with(
        backend: Arc<ScriptedBackend>,
        config: MediationConfig,
    ) -> (Arc<MediationLayer>, Arc<MemoryAuditLedger>) {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let (audit, _h) = AuditEmitter::spawn(ledger.clone());
        let layer = MediationLayer::new(backend, ToolRegistry::standard(), audit, &config);
        (Arc::new(layer), ledger)
    }

    #[tokio::test]
    async fn same_key_reaches_backend_once() {
        let backend = Arc::new(ScriptedBackend::new());
        let (layer, _) = layer(backend.clone()).await;
        let session = layer.session("corr-1", "publish_content");

        let a = session
            .invoke_tool("post_tweet", json!({"text": "hi"}), Some("k-1"))
            .await
            .unwrap();
        let b = session
            .invoke_tool("post_tweet", json!({"text": "hi"}), Some("k-1"))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(backend.effect_count("post_tweet"), 1);
        let usage = session.tool_usage();
        assert_eq!(usage.len(), 2);
        assert!(!usage[0].replayed);
        assert!(usage[1].replayed);
    }

    #[tokio::test]
    async fn concurrent_same_key_single_effect() {
        let backend = Arc::new(ScriptedBackend::new().with_latency(Duration::from_millis(5)));
        let (layer, _) = layer(backend.clone()).await;

        let calls = (0..6).map(|i| {
            let layer = Arc::clone(&layer);
            async move {
                let session = layer.session(&format!("corr-{i}"), "publish_content");
                session
                    .invoke_tool("post_linkedin", json!({"text": "x"}), Some("shared"))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(backend.effect_count("post_linkedin"), 1);
    }

    #[tokio::test]
    async fn failed_call_is_not_cached() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_tool("post_tweet", vec![Err(McpFailure::rate_limited("slow down"))]);
        let (layer, _) = layer(backend.clone()).await;
        let session = layer.session("corr-1", "publish_content");

        let first = session
            .invoke_tool("post_tweet", json!({"text": "hi"}), Some("k"))
            .await
            .unwrap_err();
        assert_eq!(first.kind, McpFailureKind::RateLimited);

        session
            .invoke_tool("post_tweet", json!({"text": "hi"}), Some("k"))
            .await
            .unwrap();
        assert_eq!(backend.effect_count("post_tweet"), 1);
    }

    #[tokio::test]
    async fn idempotency_cache_is_bounded() {
        let backend = Arc::new(ScriptedBackend::new());
        let (layer, _) = layer_with(
            backend.clone(),
            MediationConfig {
                idempotency_capacity: 2,
                ..MediationConfig::default()
            },
        );
        let session = layer.session("corr-1", "publish_content");

        for key in ["k-1", "k-2", "k-3"] {
            session
                .invoke_tool("post_tweet", json!({"text": key}), Some(key))
                .await
                .unwrap();
        }
        assert_eq!(layer.cached_keys(), 2);

        // k-3 is still cached; k-1 was the least recently used and is gone.
        session
            .invoke_tool("post_tweet", json!({"text": "k-3"}), Some("k-3"))
            .await
            .unwrap();
        assert_eq!(backend.effect_count("post_tweet"), 3);
        session
            .invoke_tool("post_tweet", json!({"text": "k-1"}), Some("k-1"))
            .await
            .unwrap();
        assert_eq!(backend.effect_count("post_tweet"), 4);
        assert_eq!(layer.cached_keys(), 2);
    }

    #[tokio::test]
    async fn expired_results_are_not_replayed() {
        let backend = Arc::new(ScriptedBackend::new());
        let (layer, _) = layer_with(
            backend.clone(),
            MediationConfig {
                idempotency_ttl_secs: 0,
                ..MediationConfig::default()
            },
        );
        let session = layer.session("corr-1", "publish_content");

        for _ in 0..2 {
            session
                .invoke_tool("post_tweet", json!({"text": "hi"}), Some("k"))
                .await
                .unwrap();
        }
        assert_eq!(backend.effect_count("post_tweet"), 2);
        assert_eq!(layer.cached_keys(), 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = Arc::new(ScriptedBackend::new().with_latency(Duration::from_millis(200)));
        let (layer, _) = layer(backend).await;
        let session = layer.session("corr-1", "generate_post_bundle");

        let err = session
            .invoke_tool("text_completion", json!({"prompt": "p"}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, McpFailureKind::Timeout);
        assert_eq!(
            session.tool_usage()[0].error_code,
            Some(crate::domain::ErrorCode::McpTimeout)
        );
    }

    #[tokio::test]
    async fn calls_are_audited_in_pairs() {
        let backend = Arc::new(ScriptedBackend::new());
        let (layer, ledger) = layer(backend).await;
        let session = layer.session("corr-9", "fetch_trends");

        session.read_resource("news://trends?window=24h").await.unwrap();
        layer.audit.flush().await;

        let names: Vec<_> = ledger
            .events_for("corr-9")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "skill.fetch_trends.mcp_query",
                "skill.fetch_trends.mcp_query.complete"
            ]
        );
    }
}
