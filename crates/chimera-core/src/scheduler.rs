//! Task queue, assignment and retry policy.
//!
//! The scheduler is the only owner of task lifecycle transitions:
//!
//! ```text
//! pending → assigned → in_progress → completed
//!                                  ↘ failed ─(retryable, budget left)→ pending
//! ```
//!
//! Assignment picks the highest priority first and FIFO within a tier. A task
//! is held by at most one worker, and a worker holds at most one task. Time is
//! passed in explicitly so retry backoff and deadline reaping are
//! deterministic under test.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::AuditEmitter;
use crate::config::SchedulerConfig;
use crate::domain::{ErrorCode, Task, TaskStatus};
use crate::metrics::METRICS;
use crate::obs;
use crate::skills::SkillFailure;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task already queued: {0}")]
    DuplicateTask(String),

    #[error("task {task_id} is not held by worker {worker_id}")]
    NotOwner { task_id: String, worker_id: String },

    #[error("task {task_id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// What happened to a task after a reported failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Back in `pending`, not eligible before `not_before`.
    Requeued { task: Task, not_before: DateTime<Utc> },
    /// Terminally `failed`.
    Terminal(Task),
}

struct Entry {
    task: Task,
    seq: u64,
    not_before: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Queue {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

pub struct Scheduler {
    queue: Mutex<Queue>,
    audit: AuditEmitter,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, audit: AuditEmitter) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            audit,
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delay before retry number `retry_count` (1-based):
    /// `min(base * 2^(retry_count - 1), cap)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(32);
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap_ms);
        Duration::from_millis(delay)
    }

    /// Run `op` between `scheduler.<name>.start` and exactly one of
    /// `.complete` (with the payload `op` returns) or `.failure`.
    fn bracketed<T>(
        &self,
        name: &str,
        correlation_id: &str,
        start: Value,
        op: impl FnOnce() -> SchedulerResult<(T, Value)>,
    ) -> SchedulerResult<T> {
        self.audit
            .emit(format!("scheduler.{name}.start"), correlation_id, start);
        match op() {
            Ok((out, payload)) => {
                self.audit
                    .emit(format!("scheduler.{name}.complete"), correlation_id, payload);
                Ok(out)
            }
            Err(e) => {
                self.audit.emit(
                    format!("scheduler.{name}.failure"),
                    correlation_id,
                    json!({ "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    /// Enqueue a pending task.
    pub fn submit(&self, task: Task) -> SchedulerResult<()> {
        let correlation_id = task.correlation_id.clone();
        let start = json!({
            "task_id": task.task_id,
            "campaign_id": task.campaign_id,
            "task_type": task.task_type,
            "priority": task.priority,
        });
        self.bracketed("submit", &correlation_id, start, || {
            if task.status != TaskStatus::Pending {
                return Err(SchedulerError::InvalidTask(format!(
                    "{} submitted in status {:?}",
                    task.task_id, task.status
                )));
            }
            if task.retry_count > task.max_retries {
                return Err(SchedulerError::InvalidTask(format!(
                    "{} has retry_count {} above max_retries {}",
                    task.task_id, task.retry_count, task.max_retries
                )));
            }

            let mut queue = self.lock();
            if queue.entries.contains_key(&task.task_id) {
                return Err(SchedulerError::DuplicateTask(task.task_id));
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            let payload = json!({ "task_id": task.task_id, "status": TaskStatus::Pending });
            queue.entries.insert(
                task.task_id.clone(),
                Entry {
                    task,
                    seq,
                    not_before: None,
                },
            );
            Ok(((), payload))
        })
    }

    /// Bind the next eligible task to `worker_id`. Returns `None` when the
    /// worker already holds a task or nothing is eligible at `now`.
    pub fn assign(&self, worker_id: &str, now: DateTime<Utc>) -> Option<Task> {
        let mut queue = self.lock();

        let busy = queue.entries.values().any(|e| {
            matches!(e.task.status, TaskStatus::Assigned | TaskStatus::InProgress)
                && e.task.assigned_worker_id.as_deref() == Some(worker_id)
        });
        if busy {
            return None;
        }

        let task_id = queue
            .entries
            .values()
            .filter(|e| e.task.status == TaskStatus::Pending)
            .filter(|e| e.not_before.map_or(true, |t| t <= now))
            .max_by(|a, b| {
                a.task
                    .priority
                    .cmp(&b.task.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|e| e.task.task_id.clone())?;

        let entry = queue.entries.get_mut(&task_id)?;
        let correlation_id = entry.task.correlation_id.clone();
        self.bracketed(
            "assign",
            &correlation_id,
            json!({ "task_id": task_id, "worker_id": worker_id }),
            || {
                entry.task.status = TaskStatus::Assigned;
                entry.task.assigned_worker_id = Some(worker_id.to_string());
                entry.not_before = None;
                Ok((
                    entry.task.clone(),
                    json!({ "task_id": task_id, "status": TaskStatus::Assigned }),
                ))
            },
        )
        .ok()
    }

    fn correlation_of(&self, task_id: &str) -> SchedulerResult<String> {
        self.lock()
            .entries
            .get(task_id)
            .map(|e| e.task.correlation_id.clone())
            .ok_or_else(|| SchedulerError::UnknownTask(task_id.to_string()))
    }

    /// Worker picked up its assigned task: `assigned → in_progress`.
    pub fn acknowledge(&self, task_id: &str, worker_id: &str) -> SchedulerResult<Task> {
        let correlation_id = self.correlation_of(task_id)?;
        self.bracketed(
            "acknowledge",
            &correlation_id,
            json!({ "task_id": task_id, "worker_id": worker_id }),
            || {
                let mut queue = self.lock();
                let entry = owned_entry(&mut queue, task_id, worker_id)?;
                transition(entry, TaskStatus::Assigned, TaskStatus::InProgress)?;
                Ok((
                    entry.task.clone(),
                    json!({ "task_id": task_id, "status": TaskStatus::InProgress }),
                ))
            },
        )
    }

    /// Artifact handed to the judge path: `in_progress → completed`.
    pub fn complete(&self, task_id: &str, worker_id: &str) -> SchedulerResult<Task> {
        let correlation_id = self.correlation_of(task_id)?;
        self.bracketed(
            "complete",
            &correlation_id,
            json!({ "task_id": task_id, "worker_id": worker_id }),
            || {
                let mut queue = self.lock();
                let entry = owned_entry(&mut queue, task_id, worker_id)?;
                transition(entry, TaskStatus::InProgress, TaskStatus::Completed)?;
                METRICS.inc_tasks_completed();
                Ok((
                    entry.task.clone(),
                    json!({ "task_id": task_id, "status": TaskStatus::Completed }),
                ))
            },
        )
    }

    /// Apply a reported failure.
    ///
    /// An overdue task fails with `DEADLINE_EXCEEDED` whatever the failure.
    /// Otherwise a retry-eligible failure with budget left requeues the task
    /// with backoff; anything else is terminal.
    pub fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        failure: &SkillFailure,
        now: DateTime<Utc>,
    ) -> SchedulerResult<FailureDisposition> {
        let correlation_id = self.correlation_of(task_id)?;
        let _span = obs::CorrelationSpan::enter(&correlation_id);
        let start = json!({
            "task_id": task_id,
            "worker_id": worker_id,
            "error_code": failure.error_code,
            "retry_eligible": failure.retry_eligible,
            "message": failure.message,
        });
        self.bracketed("fail", &correlation_id, start, || {
            let mut queue = self.lock();
            let entry = owned_entry(&mut queue, task_id, worker_id)?;
            if !matches!(entry.task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
                return Err(SchedulerError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: entry.task.status,
                    to: TaskStatus::Failed,
                });
            }

            if entry.task.is_overdue(now) {
                mark_overdue(entry);
                return Ok((
                    FailureDisposition::Terminal(entry.task.clone()),
                    json!({
                        "task_id": task_id,
                        "status": TaskStatus::Failed,
                        "error_code": ErrorCode::DeadlineExceeded,
                    }),
                ));
            }

            let task = &mut entry.task;
            if failure.retry_eligible && task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                task.assigned_worker_id = None;
                let not_before = now
                    + chrono::Duration::from_std(self.backoff(task.retry_count))
                        .unwrap_or_else(|_| chrono::Duration::zero());
                entry.not_before = Some(not_before);

                METRICS.inc_retries();
                obs::emit_task_failed(task_id, failure.error_code.as_str(), false);
                let payload = json!({
                    "task_id": task_id,
                    "status": TaskStatus::Pending,
                    "retry_count": task.retry_count,
                    "max_retries": task.max_retries,
                    "not_before": not_before,
                });
                return Ok((
                    FailureDisposition::Requeued {
                        task: task.clone(),
                        not_before,
                    },
                    payload,
                ));
            }

            task.status = TaskStatus::Failed;
            task.failure_reason = Some(failure.error_code);
            METRICS.inc_tasks_failed();
            obs::emit_task_failed(task_id, failure.error_code.as_str(), true);
            let payload = json!({
                "task_id": task_id,
                "status": TaskStatus::Failed,
                "error_code": failure.error_code,
                "retry_count": task.retry_count,
            });
            Ok((FailureDisposition::Terminal(task.clone()), payload))
        })
    }

    /// Force every non-terminal task past its deadline into terminal
    /// `failed` with `DEADLINE_EXCEEDED`, independent of retry budget.
    pub fn reap_overdue(&self, now: DateTime<Utc>) -> Vec<Task> {
        let mut queue = self.lock();
        let mut reaped = Vec::new();
        for entry in queue.entries.values_mut() {
            if entry.task.status.is_terminal() || !entry.task.is_overdue(now) {
                continue;
            }
            let correlation_id = entry.task.correlation_id.clone();
            let start = json!({
                "task_id": entry.task.task_id,
                "was": entry.task.status,
                "worker_id": entry.task.assigned_worker_id,
                "deadline": entry.task.deadline,
            });
            let task = self.bracketed("reap", &correlation_id, start, || {
                mark_overdue(entry);
                Ok((
                    entry.task.clone(),
                    json!({
                        "task_id": entry.task.task_id,
                        "status": TaskStatus::Failed,
                        "error_code": ErrorCode::DeadlineExceeded,
                    }),
                ))
            });
            reaped.extend(task);
        }
        reaped
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().entries.get(task_id).map(|e| e.task.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.count(|s| s == TaskStatus::Pending)
    }

    pub fn in_flight_count(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Assigned | TaskStatus::InProgress))
    }

    fn count(&self, pred: impl Fn(TaskStatus) -> bool) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| pred(e.task.status))
            .count()
    }

    /// Earliest time a backed-off pending task becomes eligible.
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .entries
            .values()
            .filter(|e| e.task.status == TaskStatus::Pending)
            .filter_map(|e| e.not_before)
            .min()
    }

    /// Remove and return every terminal task.
    pub fn drain_terminal(&self) -> Vec<Task> {
        let mut queue = self.lock();
        let ids: Vec<String> = queue
            .entries
            .values()
            .filter(|e| e.task.status.is_terminal())
            .map(|e| e.task.task_id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| queue.entries.remove(&id).map(|e| e.task))
            .collect()
    }
}

fn mark_overdue(entry: &mut Entry) {
    let task = &mut entry.task;
    task.status = TaskStatus::Failed;
    task.failure_reason = Some(ErrorCode::DeadlineExceeded);
    entry.not_before = None;

    METRICS.inc_tasks_failed();
    obs::emit_task_failed(&task.task_id, ErrorCode::DeadlineExceeded.as_str(), true);
}

fn owned_entry<'a>(queue: &'a mut Queue, task_id: &str, worker_id: &str) -> SchedulerResult<&'a mut Entry> {
    let entry = queue
        .entries
        .get_mut(task_id)
        .ok_or_else(|| SchedulerError::UnknownTask(task_id.to_string()))?;
    if entry.task.assigned_worker_id.as_deref() != Some(worker_id) {
        return Err(SchedulerError::NotOwner {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }
    Ok(entry)
}

fn transition(entry: &mut Entry, from: TaskStatus, to: TaskStatus) -> SchedulerResult<()> {
    if entry.task.status != from {
        return Err(SchedulerError::InvalidTransition {
            task_id: entry.task.task_id.clone(),
            from: entry.task.status,
            to,
        });
    }
    entry.task.status = to;
    Ok(())
}
