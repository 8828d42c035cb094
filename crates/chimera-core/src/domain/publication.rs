//! Publication records, keyed by idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    Published,
    Failed,
    Skipped,
    PartialSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicationRecord {
    pub platform: String,
    pub status: PublicationStatus,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    /// Per-platform key; at most one external effect exists per key.
    pub idempotency_key: String,
    pub result_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl PublicationRecord {
    pub fn published(
        platform: impl Into<String>,
        idempotency_key: impl Into<String>,
        external_id: Option<String>,
        external_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            platform: platform.into(),
            status: PublicationStatus::Published,
            external_id,
            external_url,
            idempotency_key: idempotency_key.into(),
            result_id: None,
            published_at: Some(now),
        }
    }

    pub fn not_published(
        platform: impl Into<String>,
        idempotency_key: impl Into<String>,
        status: PublicationStatus,
    ) -> Self {
        Self {
            platform: platform.into(),
            status,
            external_id: None,
            external_url: None,
            idempotency_key: idempotency_key.into(),
            result_id: None,
            published_at: None,
        }
    }
}
