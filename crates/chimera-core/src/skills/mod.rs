//! Skill contracts, registry and runtime.
//!
//! A skill is a stateless unit of work with a fixed input/output contract.
//! Requests are a tagged enum with one variant per skill, so dispatch is
//! checked once at registration and never by string matching at call time.
//! Skills only reach the outside world through the [`McpSession`] they are
//! handed; they never see the backend.

pub mod error;
pub mod fetch_trends;
pub mod generate_post_bundle;
pub mod publish_content;
pub mod runtime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ApprovalRecord, ArtifactType, ErrorCode, Task, TaskType, ToolUsageEntry};
use crate::mediation::McpSession;

pub use error::{SkillFailure, SkillRegistryError, SkillResult};
pub use fetch_trends::{FetchTrendsInput, FetchTrendsOutput, FetchTrendsSkill, TrendObject};
pub use generate_post_bundle::{
    char_limit, ContentBundle, ContentVariant, GeneratePostBundleInput, GeneratePostBundleSkill,
    PostBundleOutput, DISCLOSURE_LABEL,
};
pub use publish_content::{
    platform_tool, PublishContentInput, PublishContentOutput, PublishContentSkill, PublishStrategy,
};
pub use runtime::{SkillRegistry, SkillRuntime};

/// One request per skill, tagged by skill name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "skill", rename_all = "snake_case")]
pub enum SkillRequest {
    FetchTrends(FetchTrendsInput),
    GeneratePostBundle(GeneratePostBundleInput),
    PublishContent(PublishContentInput),
}

impl SkillRequest {
    /// Every skill name that has a request variant.
    pub const SKILL_NAMES: [&'static str; 3] =
        ["fetch_trends", "generate_post_bundle", "publish_content"];

    pub fn skill_name(&self) -> &'static str {
        match self {
            Self::FetchTrends(_) => "fetch_trends",
            Self::GeneratePostBundle(_) => "generate_post_bundle",
            Self::PublishContent(_) => "publish_content",
        }
    }

    /// Whether the named skill's contract requires an approval record.
    pub fn is_publish_class_name(name: &str) -> bool {
        name == "publish_content"
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::FetchTrends(i) => &i.correlation_id,
            Self::GeneratePostBundle(i) => &i.correlation_id,
            Self::PublishContent(i) => &i.correlation_id,
        }
    }

    /// The approval carried by a publish-class request, if any.
    pub fn approval_record(&self) -> Option<&ApprovalRecord> {
        match self {
            Self::PublishContent(i) => i.content_bundle.approval_record.as_ref(),
            _ => None,
        }
    }

    /// Required-field validation, run before the skill executes.
    pub fn validate(&self) -> SkillResult<()> {
        if self.correlation_id().trim().is_empty() {
            return Err(SkillFailure::invalid_input("correlation_id is required"));
        }
        match self {
            Self::FetchTrends(i) => i.validate(),
            Self::GeneratePostBundle(i) => i.validate(),
            Self::PublishContent(i) => i.validate(),
        }
    }

    /// Build the request for a scheduled task from its context alone.
    pub fn from_task(task: &Task) -> Self {
        let ctx = &task.context;
        match task.task_type {
            TaskType::FetchTrends => Self::FetchTrends(FetchTrendsInput::new(
                &task.correlation_id,
                &ctx.agent_id,
                &task.campaign_id,
                ctx.persona_constraints.clone(),
            )),
            TaskType::GenerateContent => {
                let content_type = ctx.content_types.first().map(String::as_str).unwrap_or("text");
                let mut input = GeneratePostBundleInput::new(
                    &task.correlation_id,
                    &task.task_id,
                    format!("{} ({content_type})", ctx.goal),
                    ctx.target_platforms.clone(),
                    ctx.persona_constraints.clone(),
                );
                input.media_generation_enabled = matches!(content_type, "image" | "video");
                Self::GeneratePostBundle(input)
            }
        }
    }
}

/// Skill-specific success payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillOutput {
    Trends(FetchTrendsOutput),
    PostBundle(PostBundleOutput),
    Publication(PublishContentOutput),
}

impl SkillOutput {
    pub fn confidence_score(&self) -> Option<f64> {
        match self {
            Self::Trends(o) => Some(o.confidence_score),
            Self::PostBundle(o) => Some(o.confidence_score),
            Self::Publication(_) => None,
        }
    }

    /// Artifact type produced when this output becomes a result artifact.
    pub fn artifact_type(&self) -> Option<ArtifactType> {
        match self {
            Self::Trends(_) => Some(ArtifactType::TrendReport),
            Self::PostBundle(_) => Some(ArtifactType::ContentBundle),
            Self::Publication(_) => None,
        }
    }

    /// External signals the output was derived from.
    pub fn signal_refs(&self) -> Vec<String> {
        match self {
            Self::Trends(o) => o
                .sources
                .iter()
                .cloned()
                .chain(o.trends.iter().map(|t| t.trend_id.clone()))
                .collect(),
            Self::PostBundle(o) => o
                .variants
                .iter()
                .flat_map(|v| v.media_refs.iter().cloned())
                .collect(),
            Self::Publication(o) => o
                .publications
                .iter()
                .filter_map(|p| p.external_id.clone())
                .collect(),
        }
    }
}

/// Wire-level outcome of one skill invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SkillOutcome {
    Success {
        output: SkillOutput,
        tool_usage: Vec<ToolUsageEntry>,
    },
    Failure(SkillFailure),
}

impl SkillOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(f) => Some(f.error_code),
        }
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    /// Publish-class skills only run with an approval record attached.
    fn publish_class(&self) -> bool {
        false
    }

    /// Tools the skill may invoke; checked against the tool registry at
    /// registration.
    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, request: &SkillRequest, session: &McpSession) -> SkillResult<SkillOutput>;
}

/// Failure for a request routed to the wrong skill.
pub(crate) fn mismatched_request(skill: &str, request: &SkillRequest) -> SkillFailure {
    SkillFailure::terminal(
        ErrorCode::Internal,
        format!("skill '{skill}' received a '{}' request", request.skill_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PersonaConstraints, Priority, TaskContext};
    use chrono::Utc;

    fn task(task_type: TaskType, content_type: &str) -> Task {
        Task::new(
            "c-1",
            task_type,
            Priority::Medium,
            TaskContext {
                goal: "Launch the beta".into(),
                persona_constraints: PersonaConstraints {
                    persona_ref: "p-1".into(),
                    name: "Nova".into(),
                    voice_traits: vec!["warm".into()],
                    directives: vec![],
                },
                target_platforms: vec!["twitter".into()],
                content_types: vec![content_type.into()],
                agent_id: "a-1".into(),
                budget_per_task: 1.0,
            },
            3,
            Utc::now(),
        )
    }

    #[test]
    fn request_from_task_carries_correlation() {
        let t = task(TaskType::FetchTrends, "text");
        let req = SkillRequest::from_task(&t);
        assert_eq!(req.skill_name(), "fetch_trends");
        assert_eq!(req.correlation_id(), t.correlation_id);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn media_enabled_only_for_visual_content() {
        let text = SkillRequest::from_task(&task(TaskType::GenerateContent, "text"));
        let image = SkillRequest::from_task(&task(TaskType::GenerateContent, "image"));
        match (text, image) {
            (SkillRequest::GeneratePostBundle(a), SkillRequest::GeneratePostBundle(b)) => {
                assert!(!a.media_generation_enabled);
                assert!(b.media_generation_enabled);
                assert!(a.content_prompt.contains("Launch the beta"));
            }
            other => panic!("unexpected requests: {other:?}"),
        }
    }

    #[test]
    fn request_is_tagged_by_skill() {
        let req = SkillRequest::from_task(&task(TaskType::FetchTrends, "text"));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["skill"], "fetch_trends");
        assert_eq!(v["time_window_hours"], 24);
    }

    #[test]
    fn failure_outcome_shape() {
        let outcome = SkillOutcome::Failure(SkillFailure::retryable(ErrorCode::McpTimeout, "slow"));
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["error_code"], "MCP_TIMEOUT");
        assert_eq!(v["retry_eligible"], true);
    }
}
