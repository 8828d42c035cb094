//! Campaigns: the goals the planner decomposes into tasks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::{ChimeraError, Result};

/// Scheduling priority. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

/// Spend caps, in abstract cost units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BudgetAllocation {
    pub daily_limit: f64,
    pub per_task_limit: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
}

/// Wire shape of a campaign before invariants are checked.
#[derive(Debug, Clone, Deserialize)]
struct CampaignSpec {
    campaign_id: String,
    goal_description: String,
    agent_ids: BTreeSet<String>,
    #[serde(default = "default_priority")]
    priority: Priority,
    budget_allocation: BudgetAllocation,
    #[serde(default = "default_status")]
    status: CampaignStatus,
    #[serde(default)]
    constraints: Constraints,
}

fn default_priority() -> Priority {
    Priority::Medium
}

fn default_status() -> CampaignStatus {
    CampaignStatus::Active
}

/// A campaign. Always holds at least one agent id, including after
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "CampaignSpec")]
pub struct Campaign {
    pub campaign_id: String,
    pub goal_description: String,
    agent_ids: BTreeSet<String>,
    pub priority: Priority,
    pub budget_allocation: BudgetAllocation,
    pub status: CampaignStatus,
    pub constraints: Constraints,
}

impl TryFrom<CampaignSpec> for Campaign {
    type Error = ChimeraError;

    fn try_from(spec: CampaignSpec) -> Result<Self> {
        let mut campaign = Campaign::new(
            spec.campaign_id,
            spec.goal_description,
            spec.agent_ids,
            spec.priority,
            spec.budget_allocation,
            spec.constraints,
        )?;
        campaign.status = spec.status;
        Ok(campaign)
    }
}

impl Campaign {
    /// Create an active campaign. Rejects an empty agent set.
    pub fn new(
        campaign_id: impl Into<String>,
        goal_description: impl Into<String>,
        agent_ids: impl IntoIterator<Item = String>,
        priority: Priority,
        budget_allocation: BudgetAllocation,
        constraints: Constraints,
    ) -> Result<Self> {
        let campaign_id = campaign_id.into();
        let goal_description = goal_description.into();
        let agent_ids: BTreeSet<String> = agent_ids
            .into_iter()
            .filter(|id| !id.trim().is_empty())
            .collect();

        if campaign_id.trim().is_empty() {
            return Err(ChimeraError::InvalidCampaign(
                "campaign_id must not be empty".into(),
            ));
        }
        if agent_ids.is_empty() {
            return Err(ChimeraError::InvalidCampaign(format!(
                "campaign '{campaign_id}' must reference at least one agent"
            )));
        }
        if goal_description.trim().is_empty() {
            return Err(ChimeraError::InvalidCampaign(format!(
                "campaign '{campaign_id}' has an empty goal"
            )));
        }
        let budget = budget_allocation;
        if !(budget.daily_limit >= 0.0 && budget.per_task_limit >= 0.0) {
            return Err(ChimeraError::InvalidCampaign(format!(
                "campaign '{campaign_id}' budget limits must be non-negative"
            )));
        }

        Ok(Self {
            campaign_id,
            goal_description,
            agent_ids,
            priority,
            budget_allocation,
            status: CampaignStatus::Active,
            constraints,
        })
    }

    /// Agent ids in sorted order. Never empty.
    pub fn agent_ids(&self) -> &BTreeSet<String> {
        &self.agent_ids
    }

    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn budget() -> BudgetAllocation {
        BudgetAllocation {
            daily_limit: 10.0,
            per_task_limit: 2.0,
        }
    }

    #[test]
    fn empty_agent_set_rejected() {
        let err = Campaign::new(
            "c-1",
            "Grow the audience",
            Vec::<String>::new(),
            Priority::High,
            budget(),
            Constraints::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one agent"));
    }

    #[test]
    fn deserialization_enforces_agent_invariant() {
        let bad = json!({
            "campaign_id": "c-1",
            "goal_description": "Launch",
            "agent_ids": [],
            "budget_allocation": {"daily_limit": 5.0, "per_task_limit": 1.0}
        });
        assert!(serde_json::from_value::<Campaign>(bad).is_err());

        let good = json!({
            "campaign_id": "c-1",
            "goal_description": "Launch",
            "agent_ids": ["a-1"],
            "status": "paused",
            "budget_allocation": {"daily_limit": 5.0, "per_task_limit": 1.0}
        });
        let campaign: Campaign = serde_json::from_value(good).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert_eq!(campaign.priority, Priority::Medium);
        assert_eq!(campaign.agent_ids().len(), 1);
    }

    #[test]
    fn priority_orders_high_last() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn serialize_round_trip_keeps_agents() {
        let c = Campaign::new(
            "c-2",
            "Explain the roadmap",
            vec!["a-1".to_string(), "a-2".to_string()],
            Priority::Low,
            budget(),
            Constraints::default(),
        )
        .unwrap();
        let back: Campaign = serde_json::from_str(&serde_json::to_string(&c).unwrap()).unwrap();
        assert_eq!(back, c);
    }
}
