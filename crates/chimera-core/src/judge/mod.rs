//! The judge: sole writer of GlobalState and sole approver of publication.
//!
//! Holds the store's [`JudgeCredential`]; no other component can obtain one.
//! Every GlobalState change (dispositions, terminal task failures, operator
//! admissions) goes through [`Judge::commit_with_retry`], which re-reads and
//! rebuilds its mutation against fresh state on `OCC_CONFLICT`, up to a
//! bounded number of attempts.

pub mod hitl;
pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use chimera_state::{JudgeCredential, Mutation, StateStore, StorageError};

use crate::approval::ApprovalAuthority;
use crate::audit::AuditEmitter;
use crate::config::JudgeConfig;
use crate::content_filter::ContentFilter;
use crate::domain::{
    Agent, AgentStatus, ApprovalRecord, ApprovedBy, ArtifactType, Campaign, CampaignStatus,
    ErrorCode, GlobalState, PublicationRecord, PublicationStatus, ResultArtifact, Task, TaskStatus,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::skills::{
    PublishContentInput, PublishStrategy, SkillFailure, SkillOutcome, SkillOutput, SkillRequest,
    SkillRuntime,
};

pub use hitl::{HumanReviewer, ReviewDecision, StaticReviewer};
pub use policy::{JudgePolicy, JudgeRule, JudgeVerdict, JudgeViolation};

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("OCC_CONFLICT: commit for {correlation_id} still conflicting after {attempts} attempts")]
    ConflictExhausted { correlation_id: String, attempts: u32 },

    #[error("admission refused: {0}")]
    Admission(String),

    #[error("judge configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl JudgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConflictExhausted { .. } => ErrorCode::OccConflict,
            Self::Admission(_) => ErrorCode::InvalidInput,
            Self::Config(_) | Self::Storage(_) => ErrorCode::Internal,
        }
    }
}

pub type JudgeResult<T> = std::result::Result<T, JudgeError>;

/// A completed task and the artifact it produced.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task: Task,
    pub artifact: ResultArtifact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Approved {
        approval: ApprovalRecord,
        publications: Vec<PublicationRecord>,
        /// Set when publishing ended in failure after approval.
        publish_failure: Option<SkillFailure>,
        state_version: u64,
    },
    /// Terminal; GlobalState is untouched.
    Rejected { code: ErrorCode, reasons: Vec<String> },
}

impl Disposition {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// A submission plus the channel its disposition is returned on.
pub struct JudgeRequest {
    pub submission: Submission,
    pub reply: oneshot::Sender<JudgeResult<Disposition>>,
}

pub struct Judge {
    store: Arc<dyn StateStore<GlobalState>>,
    credential: JudgeCredential,
    authority: ApprovalAuthority,
    runtime: Arc<SkillRuntime>,
    audit: AuditEmitter,
    config: JudgeConfig,
    policy: JudgePolicy,
    filter: ContentFilter,
    reviewer: Option<Arc<dyn HumanReviewer>>,
    publish_deadline: Duration,
}

impl Judge {
    /// Bind the judge to `store` and `runtime`, taking the store's writer
    /// credential and the runtime's approval authority.
    pub fn new(
        store: Arc<dyn StateStore<GlobalState>>,
        runtime: Arc<SkillRuntime>,
        audit: AuditEmitter,
        config: JudgeConfig,
        publish_deadline: Duration,
        reviewer: Option<Arc<dyn HumanReviewer>>,
    ) -> JudgeResult<Self> {
        let credential = store.issue_judge_credential()?;
        let authority = runtime
            .issue_approval_authority()
            .map_err(|e| JudgeError::Config(e.to_string()))?;
        let filter = ContentFilter::new(&config.unsafe_patterns)
            .map_err(|e| JudgeError::Config(format!("unsafe_patterns: {e}")))?;
        let policy = JudgePolicy::from_config(&config);
        Ok(Self {
            store,
            credential,
            authority,
            runtime,
            audit,
            config,
            policy,
            filter,
            reviewer,
            publish_deadline,
        })
    }

    pub fn with_policy(mut self, policy: JudgePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drain `requests`, evaluating each submission on its own task so
    /// decisions proceed concurrently and contend only through OCC.
    pub fn spawn_loop(self: Arc<Self>, mut requests: mpsc::Receiver<JudgeRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let judge = Arc::clone(&self);
                tokio::spawn(async move {
                    let disposition = judge.evaluate(request.submission).await;
                    if request.reply.send(disposition).is_err() {
                        warn!("judge reply dropped; submitter went away");
                    }
                });
            }
        })
    }

    // -----------------------------------------------------------------------
    // Disposition
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(correlation_id = %submission.artifact.correlation_id, result_id = %submission.artifact.result_id))]
    pub async fn evaluate(&self, submission: Submission) -> JudgeResult<Disposition> {
        let correlation_id = submission.artifact.correlation_id.clone();
        self.audit.emit(
            "judge.evaluate.start",
            &correlation_id,
            json!({
                "task_id": submission.task.task_id,
                "result_id": submission.artifact.result_id,
                "confidence_score": submission.artifact.confidence_score,
            }),
        );

        let approved_by = match self.decide(&submission).await {
            Ok(by) => by,
            Err((code, reasons)) => return Ok(self.reject(&submission, code, reasons)),
        };
        let approval = self
            .authority
            .approve(&submission.artifact.result_id, approved_by, Utc::now());

        let (publications, publish_failure) =
            if submission.artifact.artifact_type == ArtifactType::ContentBundle {
                self.publish(&submission, &approval).await
            } else {
                (Vec::new(), None)
            };

        let state_version = match self
            .record_approval(&submission, &approval, &publications)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                self.audit.emit(
                    "judge.evaluate.failure",
                    &correlation_id,
                    json!({ "error_code": e.code(), "message": e.to_string() }),
                );
                return Err(e);
            }
        };

        METRICS.inc_approvals();
        obs::emit_judge_decision(&submission.artifact.result_id, true, "approved");
        self.audit.emit(
            "judge.evaluate.complete",
            &correlation_id,
            json!({
                "decision": "approved",
                "approved_by": approved_by,
                "approval_id": approval.approval_id,
                "publications": publications.len(),
                "publish_failure": publish_failure.as_ref().map(|f| f.error_code),
                "state_version": state_version,
            }),
        );
        Ok(Disposition::Approved {
            approval,
            publications,
            publish_failure,
            state_version,
        })
    }

    /// Structural checks, policy, then the confidence band.
    async fn decide(&self, submission: &Submission) -> Result<ApprovedBy, (ErrorCode, Vec<String>)> {
        let artifact = &submission.artifact;
        if let Err(e) = artifact.validate() {
            return Err((ErrorCode::MalformedArtifact, vec![e.to_string()]));
        }
        if artifact.task_id != submission.task.task_id {
            return Err((
                ErrorCode::MalformedArtifact,
                vec![format!(
                    "artifact for task {} submitted with task {}",
                    artifact.task_id, submission.task.task_id
                )],
            ));
        }

        let verdict = self.policy.evaluate(submission, &self.filter);
        if !verdict.passed {
            let code = verdict.error_code().unwrap_or(ErrorCode::PolicyViolation);
            return Err((code, verdict.reasons()));
        }

        let confidence = artifact.confidence_score;
        if confidence >= self.config.auto_approve_threshold {
            return Ok(ApprovedBy::Judge);
        }
        if confidence < self.config.hitl_min_confidence {
            return Err((
                ErrorCode::PolicyViolation,
                vec![format!("confidence {confidence} below review band")],
            ));
        }
        match &self.reviewer {
            Some(reviewer) => {
                self.audit.emit(
                    "judge.hitl.escalated",
                    &artifact.correlation_id,
                    json!({ "result_id": artifact.result_id, "confidence_score": confidence }),
                );
                match reviewer.review(submission).await {
                    ReviewDecision::Approve => Ok(ApprovedBy::HitlReviewer),
                    ReviewDecision::Reject => Err((
                        ErrorCode::PolicyViolation,
                        vec!["rejected by human reviewer".to_string()],
                    )),
                }
            }
            None => Err((
                ErrorCode::PolicyViolation,
                vec![format!("confidence {confidence} needs review and no reviewer is configured")],
            )),
        }
    }

    fn reject(&self, submission: &Submission, code: ErrorCode, reasons: Vec<String>) -> Disposition {
        METRICS.inc_rejections();
        obs::emit_judge_decision(&submission.artifact.result_id, false, code.as_str());
        self.audit.emit(
            "judge.evaluate.complete",
            &submission.artifact.correlation_id,
            json!({ "decision": "rejected", "error_code": code, "reasons": reasons }),
        );
        Disposition::Rejected { code, reasons }
    }

    /// Invoke the publish skill for an approved bundle. Platforms are tried
    /// in order and a failing platform does not stop the rest; a retryable
    /// failure re-runs the request up to `max_publish_attempts`, with
    /// platforms that already posted replaying through the idempotency cache.
    /// Every target platform ends with exactly one record, and a platform
    /// that posted keeps its `published` record whatever happens after.
    async fn publish(
        &self,
        submission: &Submission,
        approval: &ApprovalRecord,
    ) -> (Vec<PublicationRecord>, Option<SkillFailure>) {
        let task = &submission.task;
        let idempotency_key = format!("publish:{}", task.task_id);
        let platforms = task.context.target_platforms.clone();

        let bundle = match serde_json::from_value::<SkillOutput>(submission.artifact.content.clone()) {
            Ok(SkillOutput::PostBundle(output)) => output.into_bundle(Some(approval.clone())),
            _ => {
                let failure =
                    SkillFailure::terminal(ErrorCode::MalformedArtifact, "content is not a post bundle");
                return (settle(&idempotency_key, &platforms, Vec::new()), Some(failure));
            }
        };
        let request = SkillRequest::PublishContent(PublishContentInput {
            correlation_id: submission.artifact.correlation_id.clone(),
            content_bundle: bundle,
            target_platforms: platforms.clone(),
            idempotency_key: idempotency_key.clone(),
            publish_strategy: PublishStrategy::Sequential,
            partial_success_allowed: true,
        });

        let attempts = self.config.max_publish_attempts.max(1);
        let mut known: Vec<PublicationRecord> = Vec::new();
        let mut last_failure = None;
        for attempt in 1..=attempts {
            let failure = match self.runtime.invoke(&request, self.publish_deadline).await {
                SkillOutcome::Success {
                    output: SkillOutput::Publication(output),
                    ..
                } => {
                    merge_records(&mut known, output.publications);
                    output.failure
                }
                SkillOutcome::Success { .. } => {
                    last_failure = Some(SkillFailure::terminal(
                        ErrorCode::Internal,
                        "publish skill returned a non-publication payload",
                    ));
                    break;
                }
                SkillOutcome::Failure(failure) => Some(failure),
            };
            let Some(failure) = failure else {
                last_failure = None;
                break;
            };
            let retry = failure.retry_eligible && attempt < attempts;
            last_failure = Some(failure);
            if !retry {
                break;
            }
        }

        let records = settle(&idempotency_key, &platforms, known);
        for record in &records {
            if record.status == PublicationStatus::Published {
                METRICS.inc_publications();
            }
            obs::emit_publication(
                &record.platform,
                &record.idempotency_key,
                &format!("{:?}", record.status),
            );
        }
        (records, last_failure)
    }

    async fn record_approval(
        &self,
        submission: &Submission,
        approval: &ApprovalRecord,
        publications: &[PublicationRecord],
    ) -> JudgeResult<u64> {
        let mut task = submission.task.clone();
        task.status = TaskStatus::Completed;
        let artifact = submission.artifact.clone();
        let approval = approval.clone();
        let publications = publications.to_vec();

        self.commit_with_retry(&submission.artifact.correlation_id, move |state| {
            let fresh_publications: Vec<PublicationRecord> = publications
                .iter()
                .filter(|p| {
                    state
                        .publications
                        .get(&p.idempotency_key)
                        .map_or(true, |existing| existing.status != PublicationStatus::Published)
                })
                .cloned()
                .collect();
            if state.approvals.contains_key(&artifact.result_id) && fresh_publications.is_empty() {
                return Ok(None);
            }

            let (task, artifact, approval) = (task.clone(), artifact.clone(), approval.clone());
            Ok(Some(Box::new(move |s: &mut GlobalState| {
                s.tasks.insert(task.task_id.clone(), task);
                s.approvals
                    .entry(artifact.result_id.clone())
                    .or_insert(approval);
                s.results.insert(artifact.result_id.clone(), artifact);
                for record in fresh_publications {
                    s.publications.insert(record.idempotency_key.clone(), record);
                }
            }) as Mutation<GlobalState>))
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Other committed changes
    // -----------------------------------------------------------------------

    /// Record a task's terminal failure reported by the scheduler.
    /// Recording the same task twice changes nothing.
    pub async fn record_terminal_failure(&self, task: &Task) -> JudgeResult<u64> {
        let correlation_id = task.correlation_id.clone();
        self.audit.emit(
            "judge.task_failure.start",
            &correlation_id,
            json!({ "task_id": task.task_id, "failure_reason": task.failure_reason }),
        );
        let result = if task.status != TaskStatus::Failed {
            Err(JudgeError::Admission(format!(
                "task {} is not terminally failed",
                task.task_id
            )))
        } else {
            let task = task.clone();
            self.commit_with_retry(&correlation_id, move |state| {
                if state.tasks.contains_key(&task.task_id) {
                    return Ok(None);
                }
                let task = task.clone();
                Ok(Some(Box::new(move |s: &mut GlobalState| {
                    s.tasks.insert(task.task_id.clone(), task);
                }) as Mutation<GlobalState>))
            })
            .await
        };
        match &result {
            Ok(version) => self.audit.emit(
                "judge.task_failure.complete",
                &correlation_id,
                json!({ "task_id": task.task_id, "state_version": version }),
            ),
            Err(e) => self.audit.emit(
                "judge.task_failure.failure",
                &correlation_id,
                json!({ "error_code": e.code(), "message": e.to_string() }),
            ),
        }
        result
    }

    pub async fn admit_agent(&self, agent: Agent) -> JudgeResult<u64> {
        agent
            .validate()
            .map_err(|e| JudgeError::Admission(e.to_string()))?;
        let correlation_id = format!("admin-agent-{}", agent.agent_id);
        self.admin_commit(&correlation_id, "judge.agent_admitted", move |state| {
            if state.agents.contains_key(&agent.agent_id) {
                return Err(JudgeError::Admission(format!(
                    "agent {} already exists",
                    agent.agent_id
                )));
            }
            let agent = agent.clone();
            Ok(Box::new(move |s: &mut GlobalState| {
                s.agents.insert(agent.agent_id.clone(), agent);
            }) as Mutation<GlobalState>)
        })
        .await
    }

    /// Only `status` may change on an admitted agent.
    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> JudgeResult<u64> {
        let agent_id = agent_id.to_string();
        let correlation_id = format!("admin-agent-{agent_id}");
        self.admin_commit(&correlation_id, "judge.agent_status_changed", move |state| {
            if !state.agents.contains_key(&agent_id) {
                return Err(JudgeError::Admission(format!("unknown agent {agent_id}")));
            }
            let agent_id = agent_id.clone();
            Ok(Box::new(move |s: &mut GlobalState| {
                if let Some(agent) = s.agents.get_mut(&agent_id) {
                    agent.status = status;
                }
            }) as Mutation<GlobalState>)
        })
        .await
    }

    pub async fn admit_campaign(&self, campaign: Campaign) -> JudgeResult<u64> {
        let correlation_id = format!("admin-campaign-{}", campaign.campaign_id);
        self.admin_commit(&correlation_id, "judge.campaign_admitted", move |state| {
            if state.campaigns.contains_key(&campaign.campaign_id) {
                return Err(JudgeError::Admission(format!(
                    "campaign {} already exists",
                    campaign.campaign_id
                )));
            }
            let campaign = campaign.clone();
            Ok(Box::new(move |s: &mut GlobalState| {
                s.campaigns.insert(campaign.campaign_id.clone(), campaign);
            }) as Mutation<GlobalState>)
        })
        .await
    }

    pub async fn set_campaign_status(&self, campaign_id: &str, status: CampaignStatus) -> JudgeResult<u64> {
        let campaign_id = campaign_id.to_string();
        let correlation_id = format!("admin-campaign-{campaign_id}");
        self.admin_commit(&correlation_id, "judge.campaign_status_changed", move |state| {
            if !state.campaigns.contains_key(&campaign_id) {
                return Err(JudgeError::Admission(format!("unknown campaign {campaign_id}")));
            }
            let campaign_id = campaign_id.clone();
            Ok(Box::new(move |s: &mut GlobalState| {
                if let Some(campaign) = s.campaigns.get_mut(&campaign_id) {
                    campaign.status = status;
                }
            }) as Mutation<GlobalState>)
        })
        .await
    }

    async fn admin_commit<F>(&self, correlation_id: &str, event: &str, mut plan: F) -> JudgeResult<u64>
    where
        F: FnMut(&GlobalState) -> JudgeResult<Mutation<GlobalState>> + Send,
    {
        self.audit.emit(format!("{event}.start"), correlation_id, json!({}));
        let result = self
            .commit_with_retry(correlation_id, |state| plan(state).map(Some))
            .await;
        match &result {
            Ok(version) => self.audit.emit(
                format!("{event}.complete"),
                correlation_id,
                json!({ "state_version": version }),
            ),
            Err(e) => self.audit.emit(
                format!("{event}.failure"),
                correlation_id,
                json!({ "error_code": e.code(), "message": e.to_string() }),
            ),
        }
        result
    }

    /// Read, build a mutation from the fresh snapshot, commit. On conflict,
    /// start over. `plan` returning `None` means nothing is left to change.
    pub async fn commit_with_retry<F>(&self, correlation_id: &str, mut plan: F) -> JudgeResult<u64>
    where
        F: FnMut(&GlobalState) -> JudgeResult<Option<Mutation<GlobalState>>> + Send,
    {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let snapshot = self.store.read().await?;
            let Some(mutation) = plan(&snapshot.state)? else {
                return Ok(snapshot.state_version);
            };
            match self
                .store
                .commit(&self.credential, snapshot.state_version, mutation)
                .await
            {
                Ok(version) => {
                    self.audit.emit(
                        "judge.commit",
                        correlation_id,
                        json!({ "state_version": version, "attempt": attempt }),
                    );
                    return Ok(version);
                }
                Err(StorageError::OccConflict { expected, actual }) => {
                    METRICS.inc_occ_conflicts();
                    obs::emit_occ_conflict(correlation_id, attempt, expected, actual);
                    self.audit.emit(
                        "judge.commit.conflict",
                        correlation_id,
                        json!({ "attempt": attempt, "expected": expected, "actual": actual }),
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(JudgeError::ConflictExhausted {
            correlation_id: correlation_id.to_string(),
            attempts,
        })
    }
}

/// Fold one attempt's records into `known`. A published record is final.
fn merge_records(known: &mut Vec<PublicationRecord>, records: Vec<PublicationRecord>) {
    for record in records {
        match known.iter_mut().find(|k| k.platform == record.platform) {
            Some(existing) if existing.status != PublicationStatus::Published => *existing = record,
            Some(_) => {}
            None => known.push(record),
        }
    }
}

/// One record per target platform, in target order. Platforms the skill
/// never reported on are recorded as failed.
fn settle(
    idempotency_key: &str,
    platforms: &[String],
    mut known: Vec<PublicationRecord>,
) -> Vec<PublicationRecord> {
    let mut records = Vec::with_capacity(platforms.len());
    for platform in platforms {
        if records.iter().any(|r: &PublicationRecord| &r.platform == platform) {
            continue;
        }
        match known.iter().position(|k| &k.platform == platform) {
            Some(i) => records.push(known.swap_remove(i)),
            None => records.push(PublicationRecord::not_published(
                platform.as_str(),
                format!("{idempotency_key}:{platform}"),
                PublicationStatus::Failed,
            )),
        }
    }
    records
}
