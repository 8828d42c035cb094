//! Approval records created by the judge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovedBy {
    Judge,
    HitlReviewer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Proof that a result passed governance. Required by every publish-class skill.
///
/// Minted only through an [`ApprovalAuthority`](crate::approval::ApprovalAuthority);
/// `seal` is a keyed MAC over the other fields that the skill runtime checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub result_id: String,
    pub approved_by: ApprovedBy,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub seal: String,
}

impl ApprovalRecord {
    /// Unsealed approval; the caller seals it before handing it out.
    pub(crate) fn approved(
        result_id: impl Into<String>,
        approved_by: ApprovedBy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            approval_id: format!("appr-{}", Uuid::new_v4()),
            result_id: result_id.into(),
            approved_by,
            decision: Decision::Approved,
            timestamp: now,
            seal: String::new(),
        }
    }

    /// Bytes covered by the seal.
    pub(crate) fn sealed_fields(&self) -> String {
        format!(
            "{}|{}|{:?}|{:?}|{}",
            self.approval_id,
            self.result_id,
            self.approved_by,
            self.decision,
            self.timestamp.timestamp_micros()
        )
    }

    pub fn is_approval(&self) -> bool {
        self.decision == Decision::Approved
    }
}
