//! Chimera-State: versioned global state and audit persistence.
//!
//! This crate is the only place global state lives. Everything above it sees
//! the state through the optimistic-concurrency contract:
//!
//! - `read() -> (state, state_version)`
//! - `commit(credential, expected_version, mutation) -> new_version | OCC conflict`
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic versioned commits, a single authorised writer, and an
//! append-only audit trail.
//!
//! ## Key Components
//!
//! - `StateStore`: OCC read/commit over any serialisable aggregate
//! - `JudgeCredential`: the one-per-store capability required to commit
//! - `AuditLedger`: append-only event sink keyed by correlation id
//! - `fakes`: in-memory implementations for tests and single-process runs
//! - `SurrealStateStore` / `SurrealAuditLedger`: SurrealDB-backed implementations

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{connect_from_env, connect_in_memory, CloudConfig, StoreLocation};
pub use storage_traits::{
    AuditEvent, AuditLedger, JudgeCredential, Mutation, NewAuditEvent, StateStore, StorageResult,
    VersionedState, WriterBinding,
};
pub use surreal_store::{SurrealAuditLedger, SurrealStateStore};

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
