//! `fetch_trends`: read trend signals for a campaign. Resource reads only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{mismatched_request, Skill, SkillFailure, SkillOutput, SkillRequest, SkillResult};
use crate::domain::{ErrorCode, PersonaConstraints};
use crate::mediation::McpSession;

fn default_time_window_hours() -> u32 {
    24
}

fn default_max_trends() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchTrendsInput {
    pub correlation_id: String,
    pub agent_id: String,
    pub campaign_id: String,
    pub persona_constraints: PersonaConstraints,
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: u32,
    #[serde(default = "default_max_trends")]
    pub max_trends: usize,
}

impl FetchTrendsInput {
    pub fn new(
        correlation_id: impl Into<String>,
        agent_id: impl Into<String>,
        campaign_id: impl Into<String>,
        persona_constraints: PersonaConstraints,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            agent_id: agent_id.into(),
            campaign_id: campaign_id.into(),
            persona_constraints,
            time_window_hours: default_time_window_hours(),
            max_trends: default_max_trends(),
        }
    }

    pub fn validate(&self) -> SkillResult<()> {
        if self.agent_id.trim().is_empty() || self.campaign_id.trim().is_empty() {
            return Err(SkillFailure::invalid_input(
                "agent_id and campaign_id are required",
            ));
        }
        if self.time_window_hours == 0 || self.max_trends == 0 {
            return Err(SkillFailure::invalid_input(
                "time_window_hours and max_trends must be positive",
            ));
        }
        if !self.persona_constraints.is_usable() {
            return Err(SkillFailure::terminal(
                ErrorCode::InvalidPersona,
                "persona constraints are incomplete",
            ));
        }
        Ok(())
    }

    fn resource_uri(&self) -> String {
        format!(
            "news://trends?window={}h&campaign={}",
            self.time_window_hours, self.campaign_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendObject {
    pub trend_id: String,
    pub topic: String,
    pub relevance_score: f64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub sentiment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchTrendsOutput {
    pub trends: Vec<TrendObject>,
    /// Resource URIs read.
    pub sources: Vec<String>,
    pub confidence_score: f64,
}

#[derive(Deserialize)]
struct TrendFeed {
    trends: Vec<TrendObject>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FetchTrendsSkill;

#[async_trait]
impl Skill for FetchTrendsSkill {
    fn name(&self) -> &'static str {
        "fetch_trends"
    }

    async fn execute(&self, request: &SkillRequest, session: &McpSession) -> SkillResult<SkillOutput> {
        let SkillRequest::FetchTrends(input) = request else {
            return Err(mismatched_request(self.name(), request));
        };

        let uri = input.resource_uri();
        let raw = session.read_resource(&uri).await?;
        let feed: TrendFeed = serde_json::from_value(raw).map_err(|e| {
            SkillFailure::retryable(
                ErrorCode::McpResourceUnavailable,
                format!("malformed trend feed from {uri}: {e}"),
            )
        })?;

        let mut trends: Vec<TrendObject> = feed
            .trends
            .into_iter()
            .filter(|t| (0.0..=1.0).contains(&t.relevance_score))
            .collect();
        trends.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        trends.truncate(input.max_trends);

        let confidence_score = if trends.is_empty() {
            0.0
        } else {
            trends.iter().map(|t| t.relevance_score).sum::<f64>() / trends.len() as f64
        };

        Ok(SkillOutput::Trends(FetchTrendsOutput {
            trends,
            sources: vec![uri],
            confidence_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_on_deserialize() {
        let input: FetchTrendsInput = serde_json::from_value(serde_json::json!({
            "correlation_id": "corr-1",
            "agent_id": "a-1",
            "campaign_id": "c-1",
            "persona_constraints": {
                "persona_ref": "p-1", "name": "Nova",
                "voice_traits": ["curious"], "directives": []
            }
        }))
        .unwrap();
        assert_eq!(input.time_window_hours, 24);
        assert_eq!(input.max_trends, 10);
        assert!(input.validate().is_ok());
        assert_eq!(input.resource_uri(), "news://trends?window=24h&campaign=c-1");
    }

    #[test]
    fn incomplete_persona_is_terminal() {
        let input = FetchTrendsInput::new("corr-1", "a-1", "c-1", PersonaConstraints::default());
        let err = input.validate().unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidPersona);
        assert!(!err.retry_eligible);
    }
}
