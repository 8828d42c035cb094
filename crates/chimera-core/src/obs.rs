//! Structured observability hooks for the swarm lifecycle.
//!
//! These are operator-facing log events. The durable causal record lives in
//! the audit ledger (see [`crate::audit`]); the two are complementary.
//!
//! Events are emitted at `info!` level unless noted. Set `RUST_LOG` to
//! filter and pass `--json` to the binaries for JSON output.

use tracing::{info, warn};

/// RAII guard that enters a span tagged with a correlation id.
///
/// ```ignore
/// let _span = CorrelationSpan::enter("corr-123");
/// // tracing calls here carry correlation_id = "corr-123"
/// ```
pub struct CorrelationSpan {
    _span: tracing::span::EnteredSpan,
}

impl CorrelationSpan {
    pub fn enter(correlation_id: &str) -> Self {
        let span = tracing::info_span!("chimera.correlation", correlation_id = %correlation_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_cycle_started(cycle: u64, active_campaigns: usize) {
    info!(event = "swarm.cycle_started", cycle = cycle, active_campaigns = active_campaigns);
}

pub fn emit_cycle_finished(cycle: u64, planned: usize, completed: usize, failed: usize, state_version: u64) {
    info!(
        event = "swarm.cycle_finished",
        cycle = cycle,
        planned = planned,
        completed = completed,
        failed = failed,
        state_version = state_version,
    );
}

pub fn emit_task_planned(campaign_id: &str, task_id: &str, task_type: &str) {
    info!(event = "planner.task_planned", campaign_id = %campaign_id, task_id = %task_id, task_type = %task_type);
}

pub fn emit_planner_error(campaign_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "planner.error", campaign_id = %campaign_id, error = %error);
}

pub fn emit_task_failed(task_id: &str, code: &str, terminal: bool) {
    info!(event = "scheduler.task_failed", task_id = %task_id, code = %code, terminal = terminal);
}

pub fn emit_judge_decision(result_id: &str, approved: bool, reason: &str) {
    info!(event = "judge.decision", result_id = %result_id, approved = approved, reason = %reason);
}

/// OCC conflict during a judge commit (warning level).
pub fn emit_occ_conflict(correlation_id: &str, attempt: u32, expected: u64, actual: u64) {
    warn!(
        event = "judge.occ_conflict",
        correlation_id = %correlation_id,
        attempt = attempt,
        expected = expected,
        actual = actual,
    );
}

pub fn emit_publication(platform: &str, idempotency_key: &str, status: &str) {
    info!(event = "judge.publication", platform = %platform, idempotency_key = %idempotency_key, status = %status);
}

/// Audit ledger append failure (warning level).
pub fn emit_audit_error(event_name: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.append_failed", event_name = %event_name, error = %error);
}
