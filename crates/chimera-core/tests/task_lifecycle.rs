//! Integration tests for task lifecycle: assignment exclusivity, retry
//! budget, backoff and deadlines.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use chimera_core::config::SchedulerConfig;
use chimera_core::domain::{ErrorCode, TaskStatus, TaskType};
use chimera_core::{AuditEmitter, AuditLedger, FailureDisposition, Scheduler, SkillFailure};
use chimera_state::fakes::MemoryAuditLedger;

use common::task;

fn scheduler() -> (Scheduler, AuditEmitter, Arc<MemoryAuditLedger>) {
    let ledger = Arc::new(MemoryAuditLedger::new());
    let (audit, _handle) = AuditEmitter::spawn(ledger.clone());
    (
        Scheduler::new(SchedulerConfig::default(), audit.clone()),
        audit,
        ledger,
    )
}

fn rate_limited() -> SkillFailure {
    SkillFailure::retryable(ErrorCode::RateLimited, "429 from platform")
}

// ── Retry budget ──

#[tokio::test]
async fn retry_budget_runs_out_after_max_retries() {
    let (scheduler, _audit, _ledger) = scheduler();
    let now = Utc::now();
    let mut t = task(TaskType::GenerateContent, &["twitter"], now);
    t.retry_count = 2;
    t.max_retries = 3;
    let id = t.task_id.clone();
    scheduler.submit(t).unwrap();

    scheduler.assign("w-1", now).unwrap();
    scheduler.acknowledge(&id, "w-1").unwrap();
    let FailureDisposition::Requeued { task, not_before } =
        scheduler.fail(&id, "w-1", &rate_limited(), now).unwrap()
    else {
        panic!("expected requeue");
    };
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assigned_worker_id.is_none());
    assert!(not_before > now);

    scheduler.assign("w-2", not_before).unwrap();
    scheduler.acknowledge(&id, "w-2").unwrap();
    let FailureDisposition::Terminal(task) =
        scheduler.fail(&id, "w-2", &rate_limited(), not_before).unwrap()
    else {
        panic!("expected terminal failure");
    };
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason, Some(ErrorCode::RateLimited));
}

#[tokio::test]
async fn backoff_grows_between_attempts() {
    let (scheduler, _audit, _ledger) = scheduler();
    let now = Utc::now();
    let t = task(TaskType::FetchTrends, &["twitter"], now);
    let id = t.task_id.clone();
    scheduler.submit(t).unwrap();

    let mut at = now;
    let mut gaps = Vec::new();
    for _ in 0..3 {
        scheduler.assign("w-1", at).unwrap();
        let FailureDisposition::Requeued { not_before, .. } =
            scheduler.fail(&id, "w-1", &rate_limited(), at).unwrap()
        else {
            panic!("expected requeue");
        };
        gaps.push((not_before - at).num_milliseconds());
        assert!(scheduler.assign("w-1", at).is_none(), "backed-off task assigned early");
        at = not_before;
    }
    assert_eq!(gaps, vec![500, 1000, 2000]);
}

// ── Deadlines ──

#[tokio::test]
async fn overdue_in_flight_task_is_reaped() {
    let (scheduler, audit, ledger) = scheduler();
    let now = Utc::now();
    let t = task(TaskType::GenerateContent, &["twitter"], now).with_deadline(now + Duration::seconds(1));
    let id = t.task_id.clone();
    let corr = t.correlation_id.clone();
    scheduler.submit(t).unwrap();
    scheduler.assign("w-1", now).unwrap();
    scheduler.acknowledge(&id, "w-1").unwrap();

    assert!(scheduler.reap_overdue(now).is_empty());
    let reaped = scheduler.reap_overdue(now + Duration::seconds(2));
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].status, TaskStatus::Failed);
    assert_eq!(reaped[0].failure_reason, Some(ErrorCode::DeadlineExceeded));

    // A reaped task frees its worker and is not reaped twice.
    assert!(scheduler.reap_overdue(now + Duration::seconds(3)).is_empty());
    assert_eq!(scheduler.in_flight_count(), 0);
    assert_eq!(scheduler.drain_terminal().len(), 1);

    audit.flush().await;
    let names: Vec<String> = ledger
        .events_for(&corr)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_name)
        .collect();
    assert_eq!(names.last().map(String::as_str), Some("scheduler.reap.complete"));
}

#[tokio::test]
async fn failure_after_deadline_ignores_retry_budget() {
    let (scheduler, _audit, _ledger) = scheduler();
    let now = Utc::now();
    let t = task(TaskType::GenerateContent, &["twitter"], now).with_deadline(now + Duration::seconds(1));
    let id = t.task_id.clone();
    scheduler.submit(t).unwrap();
    scheduler.assign("w-1", now).unwrap();

    let late = now + Duration::seconds(5);
    let FailureDisposition::Terminal(task) = scheduler.fail(&id, "w-1", &rate_limited(), late).unwrap() else {
        panic!("expected terminal failure");
    };
    assert_eq!(task.failure_reason, Some(ErrorCode::DeadlineExceeded));
    assert_eq!(task.retry_count, 0);
}

// ── Assignment exclusivity ──

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_a_task() {
    let (scheduler, _audit, _ledger) = scheduler();
    let scheduler = Arc::new(scheduler);
    let now = Utc::now();
    for _ in 0..5 {
        scheduler
            .submit(task(TaskType::GenerateContent, &["twitter"], now))
            .unwrap();
    }

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.assign(&format!("w-{i}"), now) })
        })
        .collect();

    let mut assigned = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            assigned.push(task);
        }
    }
    assert_eq!(assigned.len(), 5);
    let ids: HashSet<_> = assigned.iter().map(|t| t.task_id.clone()).collect();
    let workers: HashSet<_> = assigned
        .iter()
        .filter_map(|t| t.assigned_worker_id.clone())
        .collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(workers.len(), 5);
    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test]
async fn only_the_owner_may_settle_a_task() {
    let (scheduler, _audit, _ledger) = scheduler();
    let now = Utc::now();
    let t = task(TaskType::GenerateContent, &["twitter"], now);
    let id = t.task_id.clone();
    scheduler.submit(t).unwrap();
    scheduler.assign("w-1", now).unwrap();

    assert!(scheduler.acknowledge(&id, "w-2").is_err());
    assert!(scheduler.complete(&id, "w-1").is_err(), "complete before acknowledge");
    scheduler.acknowledge(&id, "w-1").unwrap();
    let done = scheduler.complete(&id, "w-1").unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(scheduler
        .fail(&id, "w-1", &rate_limited(), now)
        .is_err(), "completed task cannot fail");
}

// ── Audit ──

#[tokio::test]
async fn every_transition_is_bracketed_in_the_audit_trail() {
    let (scheduler, audit, ledger) = scheduler();
    let now = Utc::now();
    let t = task(TaskType::GenerateContent, &["twitter"], now);
    let id = t.task_id.clone();
    let corr = t.correlation_id.clone();
    scheduler.submit(t).unwrap();
    scheduler.assign("w-1", now).unwrap();
    assert!(scheduler.complete(&id, "w-1").is_err());
    scheduler.acknowledge(&id, "w-1").unwrap();
    scheduler
        .fail(&id, "w-1", &SkillFailure::terminal(ErrorCode::PromptUnsafe, "unsafe"), now)
        .unwrap();

    audit.flush().await;
    let names: Vec<String> = ledger
        .events_for(&corr)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "scheduler.submit.start",
            "scheduler.submit.complete",
            "scheduler.assign.start",
            "scheduler.assign.complete",
            "scheduler.complete.start",
            "scheduler.complete.failure",
            "scheduler.acknowledge.start",
            "scheduler.acknowledge.complete",
            "scheduler.fail.start",
            "scheduler.fail.complete",
        ]
    );
}
