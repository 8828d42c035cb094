//! Skill registry and the runtime that invokes skills under a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::instrument;

use super::{
    FetchTrendsSkill, GeneratePostBundleSkill, PublishContentSkill, Skill, SkillFailure,
    SkillOutcome, SkillRegistryError, SkillRequest,
};
use crate::approval::{ApprovalAuthority, ApprovalKeyring};
use crate::audit::AuditEmitter;
use crate::content_filter::ContentFilter;
use crate::domain::ErrorCode;
use crate::mediation::{MediationLayer, ToolRegistry};

/// Name-keyed skills, each checked against its request contract and the
/// tool registry when registered.
#[derive(Default, Clone)]
pub struct SkillRegistry {
    skills: HashMap<&'static str, Arc<dyn Skill>>,
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.skills.keys().collect();
        names.sort();
        f.debug_struct("SkillRegistry").field("skills", &names).finish()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in skills.
    pub fn builtin(tools: &ToolRegistry, filter: ContentFilter) -> Result<Self, SkillRegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(FetchTrendsSkill), tools)?;
        registry.register(Arc::new(GeneratePostBundleSkill::new(filter)), tools)?;
        registry.register(Arc::new(PublishContentSkill), tools)?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        skill: Arc<dyn Skill>,
        tools: &ToolRegistry,
    ) -> Result<(), SkillRegistryError> {
        let name = skill.name();
        if !SkillRequest::SKILL_NAMES.contains(&name) {
            return Err(SkillRegistryError::UnknownSkill(name.to_string()));
        }
        if self.skills.contains_key(name) {
            return Err(SkillRegistryError::Duplicate(name.to_string()));
        }
        if skill.publish_class() != SkillRequest::is_publish_class_name(name) {
            return Err(SkillRegistryError::PublishClassMismatch {
                skill: name.to_string(),
            });
        }
        if let Some(tool) = skill.required_tools().into_iter().find(|t| !tools.contains(t)) {
            return Err(SkillRegistryError::MissingTool {
                skill: name.to_string(),
                tool,
            });
        }
        self.skills.insert(name, skill);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Executes skills. Holds no per-invocation state.
pub struct SkillRuntime {
    registry: SkillRegistry,
    mediation: Arc<MediationLayer>,
    audit: AuditEmitter,
    approvals: ApprovalKeyring,
}

impl SkillRuntime {
    pub fn new(registry: SkillRegistry, mediation: Arc<MediationLayer>, audit: AuditEmitter) -> Self {
        Self {
            registry,
            mediation,
            audit,
            approvals: ApprovalKeyring::generate(),
        }
    }

    /// Issue the capability that mints approvals this runtime accepts.
    /// Fails on every call after the first.
    pub fn issue_approval_authority(&self) -> Result<ApprovalAuthority, SkillRegistryError> {
        self.approvals
            .issue_authority()
            .map_err(|e| SkillRegistryError::Config(e.to_string()))
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Run one skill invocation.
    ///
    /// Order: approval gate for publish-class skills, input validation, then
    /// execution bounded by `deadline`. A deadline overrun is a retryable
    /// `MCP_TIMEOUT`. Always emits `skill.<name>.start` and then exactly one
    /// of `.complete` / `.failure`.
    #[instrument(skip_all, fields(skill = request.skill_name(), correlation_id = %request.correlation_id()))]
    pub async fn invoke(&self, request: &SkillRequest, deadline: Duration) -> SkillOutcome {
        let name = request.skill_name();
        let correlation_id = request.correlation_id().to_string();
        self.audit.emit(
            format!("skill.{name}.start"),
            &correlation_id,
            json!({ "deadline_ms": deadline.as_millis() as u64 }),
        );

        let started = Instant::now();
        let outcome = self.run(request, deadline, &correlation_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            SkillOutcome::Success { output, tool_usage } => self.audit.emit(
                format!("skill.{name}.complete"),
                &correlation_id,
                json!({
                    "duration_ms": duration_ms,
                    "tool_calls": tool_usage.len(),
                    "confidence_score": output.confidence_score(),
                }),
            ),
            SkillOutcome::Failure(failure) => self.audit.emit(
                format!("skill.{name}.failure"),
                &correlation_id,
                json!({
                    "duration_ms": duration_ms,
                    "error_code": failure.error_code,
                    "retry_eligible": failure.retry_eligible,
                    "message": failure.message,
                }),
            ),
        }
        outcome
    }

    async fn run(&self, request: &SkillRequest, deadline: Duration, correlation_id: &str) -> SkillOutcome {
        let name = request.skill_name();
        let Some(skill) = self.registry.get(name) else {
            return SkillOutcome::Failure(SkillFailure::terminal(
                ErrorCode::Internal,
                format!("skill '{name}' is not registered"),
            ));
        };

        if skill.publish_class() {
            match request.approval_record() {
                None => {
                    return SkillOutcome::Failure(SkillFailure::terminal(
                        ErrorCode::MissingApproval,
                        format!("publish-class skill '{name}' invoked without approval_record"),
                    ))
                }
                Some(record) if !self.approvals.verify(record) => {
                    return SkillOutcome::Failure(SkillFailure::terminal(
                        ErrorCode::MissingApproval,
                        format!("approval {} was not issued by the judge", record.approval_id),
                    ))
                }
                Some(_) => {}
            }
        }
        if let Err(failure) = request.validate() {
            return SkillOutcome::Failure(failure);
        }

        let session = self.mediation.session(correlation_id, name);
        let result = match tokio::time::timeout(deadline, skill.execute(request, &session)).await {
            Ok(result) => result,
            Err(_) => Err(SkillFailure::retryable(
                ErrorCode::McpTimeout,
                format!("skill '{name}' exceeded its {}ms deadline", deadline.as_millis()),
            )),
        };
        let tool_usage = session.into_tool_usage();

        match result {
            Ok(output) => SkillOutcome::Success { output, tool_usage },
            Err(failure) => SkillOutcome::Failure(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::mediation::McpSession;
    use crate::skills::{SkillOutput, SkillResult};

    struct Rogue;

    #[async_trait]
    impl Skill for Rogue {
        fn name(&self) -> &'static str {
            "publish_content"
        }

        async fn execute(&self, request: &SkillRequest, _: &McpSession) -> SkillResult<SkillOutput> {
            Err(crate::skills::mismatched_request("rogue", request))
        }
    }

    struct NeedsFax;

    #[async_trait]
    impl Skill for NeedsFax {
        fn name(&self) -> &'static str {
            "fetch_trends"
        }

        fn required_tools(&self) -> Vec<String> {
            vec!["send_fax".into()]
        }

        async fn execute(&self, request: &SkillRequest, _: &McpSession) -> SkillResult<SkillOutput> {
            Err(crate::skills::mismatched_request("fax", request))
        }
    }

    #[test]
    fn builtin_registry_has_three_skills() {
        let r = SkillRegistry::builtin(&ToolRegistry::standard(), ContentFilter::default()).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.get("publish_content").unwrap().publish_class());
    }

    #[tokio::test]
    async fn approval_authority_is_issued_once() {
        let tools = ToolRegistry::standard();
        let registry = SkillRegistry::builtin(&tools, ContentFilter::default()).unwrap();
        let (audit, _handle) = AuditEmitter::spawn(Arc::new(chimera_state::fakes::MemoryAuditLedger::new()));
        let mediation = Arc::new(MediationLayer::new(
            Arc::new(crate::ScriptedBackend::new()),
            tools,
            audit.clone(),
            &crate::config::MediationConfig::default(),
        ));
        let runtime = SkillRuntime::new(registry, mediation, audit);
        assert!(runtime.issue_approval_authority().is_ok());
        assert!(runtime.issue_approval_authority().is_err());
    }

    #[test]
    fn registration_is_checked() {
        let tools = ToolRegistry::standard();
        let mut r = SkillRegistry::builtin(&tools, ContentFilter::default()).unwrap();
        assert_eq!(
            r.register(Arc::new(FetchTrendsSkill), &tools).unwrap_err(),
            SkillRegistryError::Duplicate("fetch_trends".into())
        );

        let mut empty = SkillRegistry::new();
        assert_eq!(
            empty.register(Arc::new(Rogue), &tools).unwrap_err(),
            SkillRegistryError::PublishClassMismatch {
                skill: "publish_content".into()
            }
        );
        assert!(matches!(
            empty.register(Arc::new(NeedsFax), &tools).unwrap_err(),
            SkillRegistryError::MissingTool { tool, .. } if tool == "send_fax"
        ));
        assert!(empty.is_empty());
    }
}
