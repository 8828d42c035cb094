//! SurrealDB-backed StateStore and AuditLedger
//!
//! Uses `schema::StateRow` and `schema::AuditEventRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::handle;
use crate::schema::{AuditEventRow, SeqRow, StateRow};
use crate::storage_traits::{
    AuditEvent, AuditLedger, JudgeCredential, Mutation, NewAuditEvent, StateStore, StorageResult,
    VersionedState, WriterBinding,
};

// ---------------------------------------------------------------------------
// SurrealStateStore
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`StateStore`].
///
/// The aggregate lives in the single record `global_state:current`. Commits
/// are conditional updates (`WHERE state_version = $expected`), so a writer
/// in another process that moved the version makes this commit conflict
/// rather than overwrite.
pub struct SurrealStateStore<S> {
    db: Surreal<Any>,
    writer: WriterBinding,
    /// Serialises read-modify-write within this process.
    commit_lock: Mutex<()>,
    _state: PhantomData<fn() -> S>,
}

impl<S> SurrealStateStore<S>
where
    S: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    /// Wrap an existing connection, creating the state record if absent.
    pub async fn new(db: Surreal<Any>) -> crate::Result<Self> {
        let store = Self {
            db,
            writer: WriterBinding::new(),
            commit_lock: Mutex::new(()),
            _state: PhantomData,
        };
        store
            .ensure_row()
            .await
            .map_err(|e| crate::StateError::Query(e.to_string()))?;
        Ok(store)
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_in_memory().await?;
        info!("SurrealStateStore connected (in-memory)");
        Self::new(db).await
    }

    /// Create from environment variables (see [`handle::connect_from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        let db = handle::connect_from_env().await?;
        Self::new(db).await
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_row(&self) -> StorageResult<Option<StateRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('global_state', 'current')")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<StateRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    async fn ensure_row(&self) -> StorageResult<()> {
        if self.fetch_row().await?.is_some() {
            return Ok(());
        }

        let row = StateRow {
            id: None,
            state_version: 0,
            state_json: serde_json::to_string(&S::default())?,
        };

        // A concurrent creator may win; the record existing is all that matters.
        if let Err(e) = self
            .db
            .query("CREATE type::thing('global_state', 'current') CONTENT $row")
            .bind(("row", row))
            .await
            .and_then(|mut res| res.take::<Vec<StateRow>>(0))
        {
            debug!(error = %e, "global_state create raced");
            if self.fetch_row().await?.is_none() {
                return Err(StorageError::Backend(e.to_string()));
            }
        }
        Ok(())
    }

    async fn current(&self) -> StorageResult<StateRow> {
        self.fetch_row()
            .await?
            .ok_or_else(|| StorageError::Backend("global_state record missing".to_string()))
    }
}

#[async_trait]
impl<S> StateStore<S> for SurrealStateStore<S>
where
    S: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    async fn read(&self) -> StorageResult<VersionedState<S>> {
        let row = self.current().await?;
        Ok(VersionedState {
            state: serde_json::from_str(&row.state_json)?,
            state_version: row.state_version,
        })
    }

    async fn commit(
        &self,
        credential: &JudgeCredential,
        expected_version: u64,
        mutation: Mutation<S>,
    ) -> StorageResult<u64> {
        self.writer.check(credential)?;
        let _guard = self.commit_lock.lock().await;

        let row = self.current().await?;
        if row.state_version != expected_version {
            return Err(StorageError::OccConflict {
                expected: expected_version,
                actual: row.state_version,
            });
        }

        let mut state: S = serde_json::from_str(&row.state_json)?;
        mutation(&mut state);
        let state_json = serde_json::to_string(&state)?;
        let next = expected_version + 1;

        let mut res = self
            .db
            .query(
                "UPDATE type::thing('global_state', 'current') \
                 SET state_json = $state_json, state_version = $next, updated_at = time::now() \
                 WHERE state_version = $expected RETURN AFTER",
            )
            .bind(("state_json", state_json))
            .bind(("next", next))
            .bind(("expected", expected_version))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let updated: Vec<StateRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if updated.is_empty() {
            let actual = self.current().await?.state_version;
            return Err(StorageError::OccConflict {
                expected: expected_version,
                actual,
            });
        }

        debug!(state_version = next, "state committed");
        Ok(next)
    }

    fn issue_judge_credential(&self) -> StorageResult<JudgeCredential> {
        self.writer.issue()
    }
}

// ---------------------------------------------------------------------------
// SurrealAuditLedger
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`AuditLedger`].
pub struct SurrealAuditLedger {
    db: Surreal<Any>,
    /// Last assigned sequence number.
    next_seq: Mutex<u64>,
}

impl SurrealAuditLedger {
    /// Wrap an existing connection, resuming the sequence after the highest
    /// stored event.
    pub async fn new(db: Surreal<Any>) -> crate::Result<Self> {
        let mut res = db
            .query("SELECT seq FROM audit_events ORDER BY seq DESC LIMIT 1")
            .await?;
        let rows: Vec<SeqRow> = res.take(0)?;
        let last = rows.first().map(|r| r.seq).unwrap_or(0);

        Ok(Self {
            db,
            next_seq: Mutex::new(last),
        })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_in_memory().await?;
        info!("SurrealAuditLedger connected (in-memory)");
        Self::new(db).await
    }

    fn row_to_event(row: AuditEventRow) -> StorageResult<AuditEvent> {
        Ok(AuditEvent {
            seq: row.seq,
            event_name: row.event_name,
            correlation_id: row.correlation_id,
            timestamp: row.timestamp,
            payload: serde_json::from_str(&row.payload_json)?,
        })
    }

    async fn select(&self, correlation_id: Option<String>) -> StorageResult<Vec<AuditEvent>> {
        let query = match correlation_id {
            Some(cid) => self
                .db
                .query("SELECT * FROM audit_events WHERE correlation_id = $cid ORDER BY seq ASC")
                .bind(("cid", cid)),
            None => self
                .db
                .query("SELECT * FROM audit_events ORDER BY seq ASC"),
        };

        let mut res = query
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<AuditEventRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl AuditLedger for SurrealAuditLedger {
    async fn append(&self, event: NewAuditEvent) -> StorageResult<AuditEvent> {
        let payload_json = serde_json::to_string(&event.payload)?;

        // Holding the counter across the insert keeps seq order equal to
        // storage order.
        let mut seq = self.next_seq.lock().await;
        let assigned = *seq + 1;

        let row = AuditEventRow {
            id: None,
            seq: assigned,
            event_name: event.event_name.clone(),
            correlation_id: event.correlation_id.clone(),
            timestamp: event.timestamp,
            payload_json,
        };

        let _created: Option<AuditEventRow> = self
            .db
            .create("audit_events")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        *seq = assigned;
        debug!(seq = assigned, event = %event.event_name, "audit event appended");

        Ok(AuditEvent {
            seq: assigned,
            event_name: event.event_name,
            correlation_id: event.correlation_id,
            timestamp: event.timestamp,
            payload: event.payload,
        })
    }

    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<AuditEvent>> {
        self.select(Some(correlation_id.to_string())).await
    }

    async fn all_events(&self) -> StorageResult<Vec<AuditEvent>> {
        self.select(None).await
    }
}
