//! In-memory implementations of the storage traits
//!
//! Provides `MemoryStateStore` and `MemoryAuditLedger`. They satisfy the same
//! trait contracts as the SurrealDB implementations and back the test suites
//! and single-process CLI runs.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// In-memory OCC store backed by a single `Mutex<(state, version)>`.
///
/// The version check and the mutation run under the same lock, so a commit
/// is atomic with respect to every other commit and read.
#[derive(Debug)]
pub struct MemoryStateStore<S> {
    inner: Mutex<VersionedState<S>>,
    writer: WriterBinding,
}

impl<S: Default> Default for MemoryStateStore<S> {
    fn default() -> Self {
        Self::with_state(S::default())
    }
}

impl<S> MemoryStateStore<S> {
    pub fn new() -> Self
    where
        S: Default,
    {
        Self::default()
    }

    /// Start from an existing state at version 0.
    pub fn with_state(state: S) -> Self {
        Self {
            inner: Mutex::new(VersionedState {
                state,
                state_version: 0,
            }),
            writer: WriterBinding::new(),
        }
    }
}

#[async_trait]
impl<S> StateStore<S> for MemoryStateStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn read(&self) -> StorageResult<VersionedState<S>> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    async fn commit(
        &self,
        credential: &JudgeCredential,
        expected_version: u64,
        mutation: Mutation<S>,
    ) -> StorageResult<u64> {
        self.writer.check(credential)?;

        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.state_version != expected_version {
            return Err(StorageError::OccConflict {
                expected: expected_version,
                actual: guard.state_version,
            });
        }

        // Apply to a copy so a panicking mutation leaves the store untouched.
        let mut next = guard.state.clone();
        mutation(&mut next);
        guard.state = next;
        guard.state_version += 1;

        debug!(state_version = guard.state_version, "state committed");
        Ok(guard.state_version)
    }

    fn issue_judge_credential(&self) -> StorageResult<JudgeCredential> {
        self.writer.issue()
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditLedger
// ---------------------------------------------------------------------------

/// In-memory append-only ledger backed by a `Vec<AuditEvent>`.
#[derive(Debug, Default)]
pub struct MemoryAuditLedger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLedger for MemoryAuditLedger {
    async fn append(&self, event: NewAuditEvent) -> StorageResult<AuditEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let record = AuditEvent {
            seq: events.len() as u64 + 1,
            event_name: event.event_name,
            correlation_id: event.correlation_id,
            timestamp: event.timestamp,
            payload: event.payload,
        };
        events.push(record.clone());
        Ok(record)
    }

    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<AuditEvent>> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> StorageResult<Vec<AuditEvent>> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.clone())
    }
}
