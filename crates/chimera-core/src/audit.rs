//! Process-wide audit emitter.
//!
//! Components call [`AuditEmitter::emit`], which only enqueues onto an
//! unbounded channel. A single background task drains the channel into the
//! [`AuditLedger`], so emission never waits on storage and events keep their
//! emission order. Every event is mirrored to `tracing` at debug level.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use chimera_state::{AuditLedger, NewAuditEvent};

use crate::obs;

enum Command {
    Append(NewAuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable handle onto the audit channel.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl AuditEmitter {
    /// Start the drain task. It exits once every emitter clone is dropped.
    pub fn spawn(ledger: Arc<dyn AuditLedger>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let handle = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Append(event) => {
                        let name = event.event_name.clone();
                        if let Err(e) = ledger.append(event).await {
                            obs::emit_audit_error(&name, &e);
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Enqueue an event. Never blocks.
    pub fn emit(&self, event_name: impl Into<String>, correlation_id: &str, payload: Value) {
        let event = NewAuditEvent {
            event_name: event_name.into(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
            payload,
        };
        debug!(
            audit_event = %event.event_name,
            correlation_id = %event.correlation_id,
            payload = %event.payload,
        );
        if self.tx.send(Command::Append(event)).is_err() {
            tracing::warn!(correlation_id = %correlation_id, "audit channel closed; event dropped");
        }
    }

    /// Wait until every event emitted before this call has been appended.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_state::fakes::MemoryAuditLedger;
    use serde_json::json;

    #[tokio::test]
    async fn events_land_in_emission_order() {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let (audit, _handle) = AuditEmitter::spawn(ledger.clone());

        audit.emit("task.queued", "c1", json!({}));
        audit.emit("task.assigned", "c1", json!({"worker": "w0"}));
        audit.emit("task.queued", "c2", json!({}));
        audit.flush().await;

        let c1 = ledger.events_for("c1").await.unwrap();
        let names: Vec<_> = c1.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["task.queued", "task.assigned"]);
        assert_eq!(ledger.all_events().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn drain_task_exits_when_emitters_drop() {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let (audit, handle) = AuditEmitter::spawn(ledger.clone());
        audit.emit("x", "c", json!(null));
        drop(audit);
        handle.await.unwrap();
        assert_eq!(ledger.all_events().await.unwrap().len(), 1);
    }
}
