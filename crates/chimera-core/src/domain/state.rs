//! The authoritative aggregate committed by the judge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::agent::Agent;
use super::approval::ApprovalRecord;
use super::artifact::{ArtifactType, ResultArtifact};
use super::campaign::Campaign;
use super::publication::{PublicationRecord, PublicationStatus};
use super::task::Task;

/// Committed entities keyed by id. Versioning is the store's concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalState {
    #[serde(default)]
    pub agents: BTreeMap<String, Agent>,
    #[serde(default)]
    pub campaigns: BTreeMap<String, Campaign>,
    /// Tasks in their terminal disposition.
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub results: BTreeMap<String, ResultArtifact>,
    /// Approvals keyed by result id.
    #[serde(default)]
    pub approvals: BTreeMap<String, ApprovalRecord>,
    /// Keyed by per-platform idempotency key.
    #[serde(default)]
    pub publications: BTreeMap<String, PublicationRecord>,
}

impl GlobalState {
    pub fn active_campaigns(&self) -> impl Iterator<Item = &Campaign> {
        self.campaigns.values().filter(|c| c.is_active())
    }

    /// Whether an approved trend report exists for the campaign.
    pub fn has_trend_report(&self, campaign_id: &str) -> bool {
        self.results.values().any(|r| {
            r.campaign_id == campaign_id
                && r.artifact_type == ArtifactType::TrendReport
                && self.approvals.contains_key(&r.result_id)
        })
    }

    pub fn published_count(&self) -> usize {
        self.publications
            .values()
            .filter(|p| p.status == PublicationStatus::Published)
            .count()
    }
}
