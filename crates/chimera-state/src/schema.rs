//! Row definitions for the Chimera SurrealDB tables
//!
//! Tables:
//! - global_state: a single versioned document (`global_state:current`)
//! - audit_events: append-only audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// The versioned global state document.
///
/// State is stored as serialized JSON text so arbitrary aggregates round-trip
/// without depending on SurrealDB's dynamic value mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRow {
    /// SurrealDB record ID (always `global_state:current`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub state_version: u64,
    pub state_json: String,
}

/// Audit event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub seq: u64,
    pub event_name: String,
    pub correlation_id: String,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
    pub payload_json: String,
}

/// Projection used to recover the ledger's high-water mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqRow {
    pub seq: u64,
}
