//! Contract tests for StateStore.
//!
//! Every check runs against the in-memory fake and the SurrealDB store
//! (in-memory engine); both must behave identically.

use std::sync::Arc;

use chimera_state::fakes::MemoryStateStore;
use chimera_state::storage_traits::*;
use chimera_state::{StorageError, SurrealStateStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Ledger {
    entries: Vec<String>,
}

fn push(entry: &str) -> Mutation<Ledger> {
    let entry = entry.to_string();
    Box::new(move |s: &mut Ledger| s.entries.push(entry))
}

async fn surreal() -> SurrealStateStore<Ledger> {
    SurrealStateStore::in_memory().await.unwrap()
}

// ===========================================================================
// Shared contract checks
// ===========================================================================

async fn check_initial_read(store: &dyn StateStore<Ledger>) {
    let snapshot = store.read().await.unwrap();
    assert_eq!(snapshot.state_version, 0);
    assert!(snapshot.state.entries.is_empty());
}

async fn check_commit_increments_by_one(store: &dyn StateStore<Ledger>) {
    let cred = store.issue_judge_credential().unwrap();

    let v1 = store.commit(&cred, 0, push("a")).await.unwrap();
    let v2 = store.commit(&cred, v1, push("b")).await.unwrap();
    assert_eq!((v1, v2), (1, 2));

    let snapshot = store.read().await.unwrap();
    assert_eq!(snapshot.state_version, 2);
    assert_eq!(snapshot.state.entries, vec!["a", "b"]);
}

async fn check_stale_commit_conflicts_without_applying(store: &dyn StateStore<Ledger>) {
    let cred = store.issue_judge_credential().unwrap();
    store.commit(&cred, 0, push("first")).await.unwrap();

    let err = store.commit(&cred, 0, push("stale")).await.unwrap_err();
    assert_eq!(
        err,
        StorageError::OccConflict {
            expected: 0,
            actual: 1
        }
    );

    let snapshot = store.read().await.unwrap();
    assert_eq!(snapshot.state_version, 1);
    assert_eq!(snapshot.state.entries, vec!["first"]);
}

async fn check_second_credential_refused(store: &dyn StateStore<Ledger>) {
    let _cred = store.issue_judge_credential().unwrap();
    assert_eq!(
        store.issue_judge_credential().unwrap_err(),
        StorageError::WriterAlreadyBound
    );
}

async fn check_foreign_credential_refused(store: &dyn StateStore<Ledger>) {
    let other = MemoryStateStore::<Ledger>::new();
    let foreign = other.issue_judge_credential().unwrap();
    let _own = store.issue_judge_credential().unwrap();

    let err = store.commit(&foreign, 0, push("intruder")).await.unwrap_err();
    assert_eq!(err, StorageError::UnauthorizedWriter);
    assert_eq!(store.read().await.unwrap().state_version, 0);
}

async fn check_concurrent_commits_one_winner(store: Arc<dyn StateStore<Ledger>>) {
    let cred = Arc::new(store.issue_judge_credential().unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let cred = Arc::clone(&cred);
            tokio::spawn(async move { store.commit(&cred, 0, push(&format!("w{i}"))).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let wins = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(e)) if e.is_conflict()))
        .count();

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 7);

    let snapshot = store.read().await.unwrap();
    assert_eq!(snapshot.state_version, 1);
    assert_eq!(snapshot.state.entries.len(), 1);
}

// ===========================================================================
// MemoryStateStore
// ===========================================================================

#[tokio::test]
async fn memory_initial_read_is_version_zero() {
    check_initial_read(&MemoryStateStore::<Ledger>::new()).await;
}

#[tokio::test]
async fn memory_commit_increments_by_one() {
    check_commit_increments_by_one(&MemoryStateStore::<Ledger>::new()).await;
}

#[tokio::test]
async fn memory_stale_commit_conflicts() {
    check_stale_commit_conflicts_without_applying(&MemoryStateStore::<Ledger>::new()).await;
}

#[tokio::test]
async fn memory_second_credential_refused() {
    check_second_credential_refused(&MemoryStateStore::<Ledger>::new()).await;
}

#[tokio::test]
async fn memory_foreign_credential_refused() {
    check_foreign_credential_refused(&MemoryStateStore::<Ledger>::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_commits_one_winner() {
    check_concurrent_commits_one_winner(Arc::new(MemoryStateStore::<Ledger>::new())).await;
}

#[tokio::test]
async fn memory_with_state_starts_at_zero() {
    let store = MemoryStateStore::with_state(Ledger {
        entries: vec!["seed".to_string()],
    });
    let snapshot = store.read().await.unwrap();
    assert_eq!(snapshot.state_version, 0);
    assert_eq!(snapshot.state.entries, vec!["seed"]);
}

// ===========================================================================
// SurrealStateStore
// ===========================================================================

#[tokio::test]
async fn surreal_initial_read_is_version_zero() {
    check_initial_read(&surreal().await).await;
}

#[tokio::test]
async fn surreal_commit_increments_by_one() {
    check_commit_increments_by_one(&surreal().await).await;
}

#[tokio::test]
async fn surreal_stale_commit_conflicts() {
    check_stale_commit_conflicts_without_applying(&surreal().await).await;
}

#[tokio::test]
async fn surreal_second_credential_refused() {
    check_second_credential_refused(&surreal().await).await;
}

#[tokio::test]
async fn surreal_foreign_credential_refused() {
    check_foreign_credential_refused(&surreal().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_concurrent_commits_one_winner() {
    check_concurrent_commits_one_winner(Arc::new(surreal().await)).await;
}

#[tokio::test]
async fn surreal_state_survives_reconnect_on_same_db() {
    let db = chimera_state::connect_in_memory().await.unwrap();
    let first: SurrealStateStore<Ledger> = SurrealStateStore::new(db.clone()).await.unwrap();
    let cred = first.issue_judge_credential().unwrap();
    first.commit(&cred, 0, push("kept")).await.unwrap();

    let second: SurrealStateStore<Ledger> = SurrealStateStore::new(db).await.unwrap();
    let snapshot = second.read().await.unwrap();
    assert_eq!(snapshot.state_version, 1);
    assert_eq!(snapshot.state.entries, vec!["kept"]);
}
