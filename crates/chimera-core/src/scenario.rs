//! Seed scenarios: personas, agents and campaigns loaded from a JSON file
//! and admitted into a running swarm.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Agent, Campaign, ChimeraError, InMemoryPersonaCatalog, Persona, Result};
use crate::swarm::{Swarm, SwarmError, SwarmResult};

/// Wire shape of an agent. Status and creation time are assigned on admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: String,
    pub name: String,
    pub persona_ref: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub personas: Vec<Persona>,
    pub agents: Vec<AgentSpec>,
    pub campaigns: Vec<Campaign>,
}

/// What [`Scenario::admit`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Admitted {
    pub agents: usize,
    pub campaigns: usize,
    /// Already present in state and left untouched.
    pub skipped: usize,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Structural checks: valid personas and agents, and every reference
    /// resolvable within the scenario.
    pub fn validate(&self) -> Result<()> {
        for persona in &self.personas {
            persona.validate()?;
        }
        for spec in &self.agents {
            self.agent(spec)?;
            if !self.personas.iter().any(|p| p.id == spec.persona_ref) {
                return Err(ChimeraError::InvalidAgent(format!(
                    "agent '{}' references unknown persona '{}'",
                    spec.agent_id, spec.persona_ref
                )));
            }
        }
        for campaign in &self.campaigns {
            if let Some(missing) = campaign
                .agent_ids()
                .iter()
                .find(|id| !self.agents.iter().any(|a| &a.agent_id == *id))
            {
                return Err(ChimeraError::InvalidCampaign(format!(
                    "campaign '{}' references unknown agent '{missing}'",
                    campaign.campaign_id
                )));
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> Result<InMemoryPersonaCatalog> {
        let catalog = InMemoryPersonaCatalog::new();
        for persona in &self.personas {
            catalog.insert(persona.clone())?;
        }
        Ok(catalog)
    }

    fn agent(&self, spec: &AgentSpec) -> Result<Agent> {
        Agent::new(
            spec.agent_id.clone(),
            spec.name.clone(),
            spec.persona_ref.clone(),
            spec.wallet_address.clone(),
        )
    }

    /// Admit agents then campaigns, skipping ids the state already holds so
    /// a scenario can be replayed against persistent storage.
    pub async fn admit(&self, swarm: &Swarm) -> SwarmResult<Admitted> {
        let state = swarm.state().await?.state;
        let mut admitted = Admitted::default();

        for spec in &self.agents {
            if state.agents.contains_key(&spec.agent_id) {
                admitted.skipped += 1;
                continue;
            }
            let agent = self
                .agent(spec)
                .map_err(|e| SwarmError::Config(e.to_string()))?;
            swarm.admit_agent(agent).await?;
            admitted.agents += 1;
        }
        for campaign in &self.campaigns {
            if state.campaigns.contains_key(&campaign.campaign_id) {
                admitted.skipped += 1;
                continue;
            }
            swarm.admit_campaign(campaign.clone()).await?;
            admitted.campaigns += 1;
        }

        info!(
            agents = admitted.agents,
            campaigns = admitted.campaigns,
            skipped = admitted.skipped,
            "scenario admitted"
        );
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "personas": [{
            "id": "persona-nova",
            "name": "Nova",
            "voice_traits": ["curious", "warm"],
            "directives": ["Always disclose AI generation"]
        }],
        "agents": [{
            "agent_id": "agent-1",
            "name": "Nova Prime",
            "persona_ref": "persona-nova",
            "wallet_address": "0x52908400098527886E0F7030069857D2E4169EE7"
        }],
        "campaigns": [{
            "campaign_id": "camp-1",
            "goal_description": "Announce the beta",
            "agent_ids": ["agent-1"],
            "budget_allocation": { "daily_limit": 10.0, "per_task_limit": 2.0 },
            "constraints": { "platforms": ["twitter"], "content_types": ["text"] }
        }]
    }"#;

    #[test]
    fn parses_and_builds_catalog() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.agents.len(), 1);
        assert_eq!(scenario.campaigns[0].agent_ids().len(), 1);
        assert_eq!(scenario.catalog().unwrap().len(), 1);
    }

    #[test]
    fn campaign_with_unknown_agent_is_rejected() {
        let raw = SCENARIO.replace(r#""agent_ids": ["agent-1"]"#, r#""agent_ids": ["agent-7"]"#);
        let err = Scenario::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("agent-7"));
    }

    #[test]
    fn campaign_without_agents_is_rejected() {
        let raw = SCENARIO.replace(r#""agent_ids": ["agent-1"]"#, r#""agent_ids": []"#);
        assert!(Scenario::from_json(&raw).is_err());
    }

    #[test]
    fn agent_with_unknown_persona_is_rejected() {
        let raw = SCENARIO.replace(r#""persona_ref": "persona-nova""#, r#""persona_ref": "ghost""#);
        assert!(Scenario::from_json(&raw).is_err());
    }
}
