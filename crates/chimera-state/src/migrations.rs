//! SurrealDB schema migrations and initialization
//!
//! Safe to call on every connection; `DEFINE ... IF NOT EXISTS` makes each
//! statement idempotent.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;

/// Initialize all Chimera tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Chimera SurrealDB schema");

    init_global_state_table(db).await?;
    init_audit_events_table(db).await?;

    info!("Chimera schema initialization complete");
    Ok(())
}

/// Initialize `global_state` table
///
/// Schema:
/// ```text
/// TABLE global_state {
///   id:             global_state:current (single row)
///   state_version:  INT (monotonic, +1 per commit)
///   state_json:     STRING (serialized aggregate)
///   updated_at:     DATETIME
/// }
/// ```
///
/// Constraints:
/// - Commits are conditional `UPDATE ... WHERE state_version = $expected`
/// - Rows are never deleted
async fn init_global_state_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing global_state table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS global_state AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `audit_events` table
///
/// Schema:
/// ```text
/// TABLE audit_events {
///   seq:             INT (unique, monotonic)
///   event_name:      STRING
///   correlation_id:  STRING (indexed)
///   timestamp:       DATETIME
///   payload_json:    STRING
/// }
/// ```
///
/// Constraints:
/// - Append-only: update and delete are not permitted
/// - `seq` is unique
async fn init_audit_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing audit_events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS audit_events AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_audit_seq ON TABLE audit_events COLUMNS seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_audit_correlation ON TABLE audit_events COLUMNS correlation_id;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}
