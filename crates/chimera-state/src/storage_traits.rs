//! Storage trait definitions for Chimera
//!
//! These traits define the two persistence abstractions:
//! - `StateStore`: versioned global state with optimistic concurrency control
//! - `AuditLedger`: append-only audit events keyed by correlation id
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// StateStore: OCC-versioned aggregate
// ---------------------------------------------------------------------------

/// A state snapshot together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedState<S> {
    pub state: S,
    pub state_version: u64,
}

/// A state mutation, applied atomically by the store after the version check.
pub type Mutation<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Capability required to call [`StateStore::commit`].
///
/// Each store issues exactly one credential over its lifetime. The token is
/// private and the type is neither `Clone` nor constructible outside this
/// crate, so holding it is the only way to write.
pub struct JudgeCredential {
    token: Uuid,
}

impl std::fmt::Debug for JudgeCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JudgeCredential(..)")
    }
}

/// Tracks which credential (if any) a store has bound as its sole writer.
#[derive(Debug, Default)]
pub struct WriterBinding {
    token: Mutex<Option<Uuid>>,
}

impl WriterBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the store's credential. Fails on every call after the first.
    pub fn issue(&self) -> StorageResult<JudgeCredential> {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(StorageError::WriterAlreadyBound);
        }
        let token = Uuid::new_v4();
        *guard = Some(token);
        Ok(JudgeCredential { token })
    }

    /// Verify `credential` is the one this binding issued.
    pub fn check(&self, credential: &JudgeCredential) -> StorageResult<()> {
        let guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(token) if token == credential.token => Ok(()),
            _ => Err(StorageError::UnauthorizedWriter),
        }
    }
}

/// Versioned global state store.
///
/// Guarantees:
/// - `commit` succeeds only if `expected_version` equals the current version.
/// - On success the version increments by exactly one and the mutation is
///   applied atomically.
/// - On conflict nothing is applied; the store never merges.
/// - Only the holder of the store's [`JudgeCredential`] may commit.
#[async_trait]
pub trait StateStore<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Read the current state and its version.
    async fn read(&self) -> StorageResult<VersionedState<S>>;

    /// Apply `mutation` if the store is still at `expected_version`.
    ///
    /// Returns the new version, or `StorageError::OccConflict`.
    async fn commit(
        &self,
        credential: &JudgeCredential,
        expected_version: u64,
        mutation: Mutation<S>,
    ) -> StorageResult<u64>;

    /// Issue the single writer credential for this store.
    fn issue_judge_credential(&self) -> StorageResult<JudgeCredential>;
}

// ---------------------------------------------------------------------------
// AuditLedger: append-only event sink
// ---------------------------------------------------------------------------

/// An audit event before the ledger assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    /// Dotted event name (e.g. "skill.fetch_trends.start")
    pub event_name: String,
    /// Causal chain this event belongs to
    pub correlation_id: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub payload: serde_json::Value,
}

/// A persisted audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic ledger-wide sequence number (emission order)
    pub seq: u64,
    pub event_name: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Append-only audit ledger.
///
/// Guarantees:
/// - Events receive strictly increasing `seq` in append order.
/// - Events are never updated or deleted; the trait has no such operations.
/// - `events_for` returns one correlation id's events ordered by `seq`.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Append an event, returning it with its assigned sequence number.
    async fn append(&self, event: NewAuditEvent) -> StorageResult<AuditEvent>;

    /// All events for a correlation id, ordered by seq.
    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<AuditEvent>>;

    /// Every event in the ledger, ordered by seq.
    async fn all_events(&self) -> StorageResult<Vec<AuditEvent>>;
}
