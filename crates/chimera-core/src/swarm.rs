//! Swarm wiring: one object that owns every component and drives cycles.
//!
//! A cycle is: reap overdue tasks, plan against a fresh snapshot, enqueue,
//! assign one task per idle worker, execute in parallel, settle each outcome
//! with the scheduler, and hand completed artifacts to the judge over a
//! channel. The swarm itself never commits; terminal failures and
//! dispositions are written by the judge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use chimera_state::{AuditLedger, StateStore, StorageError, VersionedState};

use crate::audit::AuditEmitter;
use crate::config::SwarmConfig;
use crate::content_filter::ContentFilter;
use crate::domain::{
    Agent, AgentStatus, Campaign, CampaignStatus, ErrorCode, GlobalState, PersonaCatalog,
    PublicationStatus,
};
use crate::judge::{Disposition, HumanReviewer, Judge, JudgeError, JudgeRequest, Submission};
use crate::mediation::{McpBackend, MediationLayer, ToolRegistry};
use crate::obs;
use crate::planner::Planner;
use crate::scheduler::{FailureDisposition, Scheduler};
use crate::skills::{SkillFailure, SkillRegistry, SkillRegistryError, SkillRuntime};
use crate::worker::{Assignment, WorkerOutcome, WorkerPool};

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error(transparent)]
    Skills(#[from] SkillRegistryError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("judge loop is not running")]
    JudgeUnavailable,
}

pub type SwarmResult<T> = std::result::Result<T, SwarmError>;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub planned: usize,
    pub planner_errors: usize,
    pub assigned: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub reaped: usize,
    pub approved: usize,
    pub rejected: usize,
    pub judge_errors: usize,
    pub published: usize,
    pub state_version: u64,
}

impl CycleReport {
    /// Nothing happened this cycle.
    pub fn is_quiet(&self) -> bool {
        self.planned == 0 && self.assigned == 0 && self.reaped == 0
    }
}

pub struct Swarm {
    store: Arc<dyn StateStore<GlobalState>>,
    audit: AuditEmitter,
    audit_handle: JoinHandle<()>,
    scheduler: Scheduler,
    planner: Planner,
    pool: WorkerPool,
    judge: Arc<Judge>,
    judge_tx: mpsc::Sender<JudgeRequest>,
    judge_handle: JoinHandle<()>,
    cycle: AtomicU64,
}

impl Swarm {
    /// Wire every component. Must run inside a tokio runtime.
    pub fn new(
        config: SwarmConfig,
        store: Arc<dyn StateStore<GlobalState>>,
        ledger: Arc<dyn AuditLedger>,
        backend: Arc<dyn McpBackend>,
        personas: Arc<dyn PersonaCatalog>,
        reviewer: Option<Arc<dyn HumanReviewer>>,
    ) -> SwarmResult<Self> {
        config
            .validate()
            .map_err(|e| SwarmError::Config(e.to_string()))?;

        let (audit, audit_handle) = AuditEmitter::spawn(ledger);
        let mediation = Arc::new(MediationLayer::new(
            backend,
            ToolRegistry::standard(),
            audit.clone(),
            &config.mediation,
        ));
        let filter = ContentFilter::new(&config.judge.unsafe_patterns)
            .map_err(|e| SwarmError::Config(format!("unsafe_patterns: {e}")))?;
        let registry = SkillRegistry::builtin(mediation.tools(), filter)?;
        let runtime = Arc::new(SkillRuntime::new(registry, mediation, audit.clone()));

        let judge = Arc::new(Judge::new(
            Arc::clone(&store),
            Arc::clone(&runtime),
            audit.clone(),
            config.judge.clone(),
            config.worker.skill_deadline(),
            reviewer,
        )?);
        let (judge_tx, judge_rx) = mpsc::channel(config.worker.pool_size.max(1) * 4);
        let judge_handle = Arc::clone(&judge).spawn_loop(judge_rx);

        Ok(Self {
            scheduler: Scheduler::new(config.scheduler.clone(), audit.clone()),
            planner: Planner::new(
                config.planner.clone(),
                config.scheduler.clone(),
                personas,
                audit.clone(),
            ),
            pool: WorkerPool::new(runtime, &config.worker),
            store,
            audit,
            audit_handle,
            judge,
            judge_tx,
            judge_handle,
            cycle: AtomicU64::new(0),
        })
    }

    pub fn audit(&self) -> &AuditEmitter {
        &self.audit
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn judge(&self) -> &Arc<Judge> {
        &self.judge
    }

    pub async fn state(&self) -> SwarmResult<VersionedState<GlobalState>> {
        Ok(self.store.read().await?)
    }

    pub async fn admit_agent(&self, agent: Agent) -> SwarmResult<u64> {
        Ok(self.judge.admit_agent(agent).await?)
    }

    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> SwarmResult<u64> {
        Ok(self.judge.set_agent_status(agent_id, status).await?)
    }

    pub async fn admit_campaign(&self, campaign: Campaign) -> SwarmResult<u64> {
        Ok(self.judge.admit_campaign(campaign).await?)
    }

    pub async fn set_campaign_status(&self, campaign_id: &str, status: CampaignStatus) -> SwarmResult<u64> {
        Ok(self.judge.set_campaign_status(campaign_id, status).await?)
    }

    pub async fn run_cycle(&self) -> SwarmResult<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One plan → schedule → execute → judge → reap pass at time `now`.
    #[instrument(skip(self))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> SwarmResult<CycleReport> {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        for task in self.scheduler.reap_overdue(now) {
            report.reaped += 1;
            self.judge.record_terminal_failure(&task).await?;
        }

        let snapshot = self.store.read().await?;
        obs::emit_cycle_started(cycle, snapshot.state.active_campaigns().count());

        let plan = self.planner.plan_cycle(&snapshot.state, now).await;
        report.planner_errors = plan.errors.len();
        for task in plan.tasks {
            let task_id = task.task_id.clone();
            match self.scheduler.submit(task) {
                Ok(()) => report.planned += 1,
                Err(e) => warn!(task_id = %task_id, error = %e, "planned task not queued"),
            }
        }

        let mut assignments = Vec::new();
        for worker_id in self.pool.worker_ids() {
            let Some(task) = self.scheduler.assign(&worker_id, now) else {
                continue;
            };
            report.assigned += 1;
            let active = snapshot
                .state
                .campaigns
                .get(&task.campaign_id)
                .is_some_and(|c| c.is_active());
            if !active {
                let failure = SkillFailure::terminal(
                    ErrorCode::InactiveCampaign,
                    format!("campaign {} is not active", task.campaign_id),
                );
                self.settle_failure(&task.task_id, &worker_id, &failure, now, &mut report)
                    .await?;
                continue;
            }
            match self.scheduler.acknowledge(&task.task_id, &worker_id) {
                Ok(task) => assignments.push(Assignment { worker_id, task }),
                Err(e) => warn!(task_id = %task.task_id, error = %e, "acknowledge failed"),
            }
        }

        let executions = self.pool.execute_all(assignments).await;
        let mut replies = Vec::new();
        for execution in executions {
            match execution.outcome {
                WorkerOutcome::Completed(artifact) => {
                    let task = match self.scheduler.complete(&execution.task_id, &execution.worker_id) {
                        Ok(task) => task,
                        Err(e) => {
                            warn!(task_id = %execution.task_id, error = %e, "completion rejected");
                            continue;
                        }
                    };
                    report.completed += 1;
                    let (reply, wait) = oneshot::channel();
                    self.judge_tx
                        .send(JudgeRequest {
                            submission: Submission { task, artifact },
                            reply,
                        })
                        .await
                        .map_err(|_| SwarmError::JudgeUnavailable)?;
                    replies.push(wait);
                }
                WorkerOutcome::Failed(failure) => {
                    self.settle_failure(
                        &execution.task_id,
                        &execution.worker_id,
                        &failure,
                        now,
                        &mut report,
                    )
                    .await?;
                }
            }
        }

        for reply in join_all(replies).await {
            match reply {
                Ok(Ok(Disposition::Approved { publications, .. })) => {
                    report.approved += 1;
                    report.published += publications
                        .iter()
                        .filter(|p| p.status == PublicationStatus::Published)
                        .count();
                }
                Ok(Ok(Disposition::Rejected { .. })) => report.rejected += 1,
                Ok(Err(e)) => {
                    report.judge_errors += 1;
                    warn!(error = %e, code = %e.code(), "judge could not settle submission");
                }
                Err(_) => {
                    report.judge_errors += 1;
                    warn!("judge dropped a submission");
                }
            }
        }

        self.scheduler.drain_terminal();
        report.state_version = self.store.read().await?.state_version;
        obs::emit_cycle_finished(
            cycle,
            report.planned,
            report.completed,
            report.failed,
            report.state_version,
        );
        Ok(report)
    }

    async fn settle_failure(
        &self,
        task_id: &str,
        worker_id: &str,
        failure: &SkillFailure,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> SwarmResult<()> {
        match self.scheduler.fail(task_id, worker_id, failure, now) {
            Ok(FailureDisposition::Requeued { .. }) => report.retried += 1,
            Ok(FailureDisposition::Terminal(task)) => {
                report.failed += 1;
                self.judge.record_terminal_failure(&task).await?;
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "failure not applied"),
        }
        Ok(())
    }

    /// Run cycles until nothing is planned, queued or in flight, sleeping
    /// through retry backoff. Stops after `max_cycles` regardless.
    pub async fn run_until_idle(&self, max_cycles: usize) -> SwarmResult<Vec<CycleReport>> {
        let mut reports = Vec::new();
        for _ in 0..max_cycles {
            let report = self.run_cycle().await?;
            let quiet = report.is_quiet();
            reports.push(report);

            let pending = self.scheduler.pending_count();
            if quiet && pending == 0 && self.scheduler.in_flight_count() == 0 {
                break;
            }
            if let Some(at) = self.scheduler.next_eligible_at() {
                if let Ok(wait) = (at - Utc::now()).to_std() {
                    tokio::time::sleep(wait).await;
                }
            }
        }
        Ok(reports)
    }

    /// Wait until every audit event emitted so far is in the ledger.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    /// Stop the judge loop and drain the audit channel.
    pub async fn shutdown(self) {
        self.audit.flush().await;
        drop(self.judge_tx);
        if let Err(e) = self.judge_handle.await {
            warn!(error = %e, "judge loop ended abnormally");
        }
        self.audit_handle.abort();
    }
}
