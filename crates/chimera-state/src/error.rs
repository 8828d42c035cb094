//! Error types for chimera-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the storage traits
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store moved past the version the caller read.
    #[error("OCC_CONFLICT: expected state_version {expected}, store is at {actual}")]
    OccConflict { expected: u64, actual: u64 },

    /// A commit was attempted without the store's judge credential.
    #[error("unauthorized writer: only the judge credential may commit")]
    UnauthorizedWriter,

    /// The judge credential for this store has already been issued.
    #[error("judge credential already issued for this store")]
    WriterAlreadyBound,

    /// Serialization of state or payload failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend (database) failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether the caller should re-read and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::OccConflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
