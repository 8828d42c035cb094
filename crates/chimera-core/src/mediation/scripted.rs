//! Deterministic in-process [`McpBackend`].
//!
//! Used by the test suites and by `chimera run` when no real MCP transport is
//! configured. Every tool has a built-in deterministic response; tests can
//! queue scripted responses per tool or per resource prefix, which are
//! consumed before falling back to the defaults.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::error::{McpFailure, McpResult};
use super::McpBackend;

/// A call observed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub target: String,
    pub params: Value,
    pub idempotency_key: Option<String>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct ScriptState {
    tool_scripts: HashMap<String, VecDeque<McpResult<Value>>>,
    resource_scripts: Vec<(String, VecDeque<McpResult<Value>>)>,
    calls: Vec<RecordedCall>,
    post_counters: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
    latency: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue responses for `tool`, consumed one per call.
    pub fn script_tool(&self, tool: &str, responses: Vec<McpResult<Value>>) {
        let mut state = self.lock();
        state
            .tool_scripts
            .entry(tool.to_string())
            .or_default()
            .extend(responses);
    }

    /// Queue responses for resources whose URI starts with `uri_prefix`.
    pub fn script_resource(&self, uri_prefix: &str, responses: Vec<McpResult<Value>>) {
        let mut state = self.lock();
        state
            .resource_scripts
            .push((uri_prefix.to_string(), responses.into_iter().collect()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Successful backend calls to `target`; for side-effecting tools, the
    /// number of external effects produced.
    pub fn effect_count(&self, target: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.target == target && c.succeeded)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn default_tool_response(state: &mut ScriptState, tool: &str, params: &Value) -> Value {
        match tool {
            "text_completion" => {
                let prompt = params["prompt"].as_str().unwrap_or_default();
                let platform = params["platform"].as_str().unwrap_or("generic");
                json!({
                    "text": format!("[{platform}] {prompt}"),
                    "hashtags": ["#chimera", format!("#{platform}")],
                    "confidence": 0.9,
                })
            }
            "generate_image" => {
                let prompt = params["prompt"].as_str().unwrap_or_default();
                json!({ "media_ref": format!("media-{}", short_digest(prompt)) })
            }
            "upload_media" => {
                let refs: Vec<String> = params["media_refs"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(|r| format!("uploaded-{r}"))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "media_ids": refs })
            }
            t if t.starts_with("post_") => {
                let platform = &t["post_".len()..];
                let n = state.post_counters.entry(t.to_string()).or_insert(0);
                *n += 1;
                json!({
                    "external_id": format!("{platform}-{n}"),
                    "external_url": format!("https://{platform}.example.com/posts/{n}"),
                })
            }
            _ => json!({ "ok": true }),
        }
    }

    fn default_resource_response(uri: &str) -> McpResult<Value> {
        if uri.starts_with("news://trends") {
            return Ok(json!({
                "trends": [
                    {"trend_id": "tr-ai-agents", "topic": "AI agents", "relevance_score": 0.94, "volume": 48000, "sentiment": "positive"},
                    {"trend_id": "tr-creator-economy", "topic": "Creator economy", "relevance_score": 0.83, "volume": 23000, "sentiment": "neutral"},
                    {"trend_id": "tr-open-source", "topic": "Open source tooling", "relevance_score": 0.71, "volume": 9100, "sentiment": "positive"},
                ]
            }));
        }
        Err(McpFailure::unavailable(format!("no such resource: {uri}")))
    }
}

fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..6])
}

#[async_trait]
impl McpBackend for ScriptedBackend {
    async fn invoke_tool(
        &self,
        tool_name: &str,
        params: &Value,
        idempotency_key: Option<&str>,
    ) -> McpResult<Value> {
        self.pause().await;

        let mut state = self.lock();
        let scripted = state
            .tool_scripts
            .get_mut(tool_name)
            .and_then(VecDeque::pop_front);
        let result = match scripted {
            Some(scripted) => scripted,
            None => Ok(Self::default_tool_response(&mut state, tool_name, params)),
        };
        state.calls.push(RecordedCall {
            target: tool_name.to_string(),
            params: params.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
            succeeded: result.is_ok(),
        });
        result
    }

    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.pause().await;

        let mut state = self.lock();
        let scripted = state
            .resource_scripts
            .iter_mut()
            .find(|(prefix, queue)| uri.starts_with(prefix.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        let result = scripted.unwrap_or_else(|| Self::default_resource_response(uri));
        state.calls.push(RecordedCall {
            target: uri.to_string(),
            params: Value::Null,
            idempotency_key: None,
            succeeded: result.is_ok(),
        });
        result
    }
}
