//! Human-in-the-loop review for artifacts in the escalation band.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Submission;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[async_trait]
pub trait HumanReviewer: Send + Sync {
    async fn review(&self, submission: &Submission) -> ReviewDecision;
}

/// Reviewer that always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct StaticReviewer(pub ReviewDecision);

#[async_trait]
impl HumanReviewer for StaticReviewer {
    async fn review(&self, _submission: &Submission) -> ReviewDecision {
        self.0
    }
}
