//! Stateless workers and the bounded pool that runs them.
//!
//! A [`Worker`] holds nothing but its id. Everything an execution needs comes
//! from the task's context and the shared [`SkillRuntime`]; nothing is kept
//! between invocations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::domain::{ErrorCode, Provenance, ResultArtifact, Task};
use crate::skills::{SkillFailure, SkillOutcome, SkillRequest, SkillRuntime};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed(ResultArtifact),
    Failed(SkillFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    worker_id: String,
}

impl Worker {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    /// Execute one task, producing exactly one artifact or one failure.
    #[instrument(skip_all, fields(worker_id = %self.worker_id, task_id = %task.task_id))]
    pub async fn execute(&self, task: &Task, runtime: &SkillRuntime, deadline: Duration) -> WorkerOutcome {
        let started = Instant::now();
        let request = SkillRequest::from_task(task);

        let (output, tool_usage) = match runtime.invoke(&request, deadline).await {
            SkillOutcome::Success { output, tool_usage } => (output, tool_usage),
            SkillOutcome::Failure(failure) => return WorkerOutcome::Failed(failure),
        };

        let Some(artifact_type) = output.artifact_type() else {
            return WorkerOutcome::Failed(SkillFailure::terminal(
                ErrorCode::Internal,
                format!("skill '{}' does not produce task artifacts", request.skill_name()),
            ));
        };
        let content = match serde_json::to_value(&output) {
            Ok(v) => v,
            Err(e) => {
                return WorkerOutcome::Failed(SkillFailure::terminal(
                    ErrorCode::Internal,
                    format!("cannot encode skill output: {e}"),
                ))
            }
        };

        WorkerOutcome::Completed(ResultArtifact {
            result_id: format!("res-{}", Uuid::new_v4()),
            task_id: task.task_id.clone(),
            correlation_id: task.correlation_id.clone(),
            campaign_id: task.campaign_id.clone(),
            worker_id: self.worker_id.clone(),
            artifact_type,
            confidence_score: output.confidence_score().unwrap_or(0.0),
            provenance: Provenance {
                memory_refs: vec![task.context.persona_constraints.persona_ref.clone()],
                signal_refs: output.signal_refs(),
            },
            content,
            tool_usage,
            execution_duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// A task bound to the worker the scheduler assigned it to.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub worker_id: String,
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub worker_id: String,
    pub task_id: String,
    pub outcome: WorkerOutcome,
}

/// Runs assignments concurrently, at most `pool_size` at a time.
pub struct WorkerPool {
    runtime: Arc<SkillRuntime>,
    workers: Vec<Worker>,
    permits: Arc<Semaphore>,
    deadline: Duration,
}

impl WorkerPool {
    pub fn new(runtime: Arc<SkillRuntime>, config: &WorkerConfig) -> Self {
        let size = config.pool_size.max(1);
        Self {
            runtime,
            workers: (0..size).map(|i| Worker::new(format!("worker-{i}"))).collect(),
            permits: Arc::new(Semaphore::new(size)),
            deadline: config.skill_deadline(),
        }
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.worker_id.clone()).collect()
    }

    /// Execute every assignment; results come back in input order.
    #[instrument(skip_all, fields(assignments = assignments.len()))]
    pub async fn execute_all(&self, assignments: Vec<Assignment>) -> Vec<Execution> {
        let mut handles = Vec::with_capacity(assignments.len());

        for assignment in assignments {
            let runtime = Arc::clone(&self.runtime);
            let permits = Arc::clone(&self.permits);
            let deadline = self.deadline;
            let worker_id = assignment.worker_id.clone();
            let task_id = assignment.task.task_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let worker = Worker::new(assignment.worker_id);
                worker.execute(&assignment.task, &runtime, deadline).await
            });
            handles.push((worker_id, task_id, handle));
        }

        let mut executions = Vec::with_capacity(handles.len());
        for (worker_id, task_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "worker task aborted");
                    WorkerOutcome::Failed(SkillFailure::terminal(
                        ErrorCode::Internal,
                        format!("worker aborted: {e}"),
                    ))
                }
            };
            executions.push(Execution {
                worker_id,
                task_id,
                outcome,
            });
        }
        executions
    }
}
