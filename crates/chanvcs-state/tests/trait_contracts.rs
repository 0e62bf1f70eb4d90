//! Trait contract tests for FileStore, VersionControl, and ApprovalLog.
//!
//! These tests verify the behavioral contracts of the storage traits using
//! the in-memory fakes and the filesystem store. Any conforming
//! implementation must pass these.

use chanvcs_state::fakes::{MemoryApprovalLog, MemoryRepository};
use chanvcs_state::storage_traits::*;
use chanvcs_state::{FsFileStore, StorageError};

// ===========================================================================
// FileStore contract tests
// ===========================================================================

async fn file_store_contract(store: &dyn FileStore) {
    assert!(store.read_file("t/channels/a/channel.xml").await.unwrap().is_none());

    store
        .write_file("t/channels/a/channel.xml", b"<channel/>")
        .await
        .unwrap();
    store
        .write_file("t/channels/a/destinations/00-out.yaml", b"name: out")
        .await
        .unwrap();
    store
        .write_file("t/environments/defaults.yaml", b"HOST: db")
        .await
        .unwrap();

    assert_eq!(
        store.read_file("t/channels/a/channel.xml").await.unwrap().as_deref(),
        Some(&b"<channel/>"[..])
    );

    let listed = store.list_files("t/channels").await.unwrap();
    assert_eq!(
        listed,
        vec![
            "t/channels/a/channel.xml".to_string(),
            "t/channels/a/destinations/00-out.yaml".to_string(),
        ]
    );

    store
        .write_file("t/channels/a/channel.xml", b"<channel></channel>")
        .await
        .unwrap();
    assert_eq!(
        store.read_file("t/channels/a/channel.xml").await.unwrap().as_deref(),
        Some(&b"<channel></channel>"[..])
    );

    store.remove_file("t/channels/a/channel.xml").await.unwrap();
    store.remove_file("t/channels/a/channel.xml").await.unwrap();
    assert!(store.read_file("t/channels/a/channel.xml").await.unwrap().is_none());

    let err = store.read_file("../outside").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath { .. }));
}

#[tokio::test]
async fn memory_repository_satisfies_file_store_contract() {
    let repo = MemoryRepository::new();
    file_store_contract(&repo).await;
}

#[tokio::test]
async fn fs_store_satisfies_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsFileStore::new(dir.path());
    file_store_contract(&store).await;
}

// ===========================================================================
// VersionControl contract tests (memory repository)
// ===========================================================================

#[tokio::test]
async fn commit_returns_none_when_nothing_changed() {
    let repo = MemoryRepository::new();
    assert!(repo.commit("empty", &[]).await.unwrap().is_none());

    repo.write_file("t/a.yaml", b"1").await.unwrap();
    assert!(repo.commit("first", &[]).await.unwrap().is_some());
    assert!(repo.commit("again", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn commit_with_paths_only_captures_those_paths() {
    let repo = MemoryRepository::new();
    repo.write_file("t/channels/a/x.yaml", b"a").await.unwrap();
    repo.write_file("t/channels/b/x.yaml", b"b").await.unwrap();
    let first = repo
        .commit("only a", &["t/channels/a".to_string()])
        .await
        .unwrap()
        .unwrap();
    let second = repo
        .commit("rest", &[])
        .await
        .unwrap()
        .unwrap();

    let changes = repo
        .changed_paths(first.as_str(), second.as_str())
        .await
        .unwrap();
    assert_eq!(
        changes,
        vec![ChangedPath::new("t/channels/b/x.yaml", ChangeStatus::Added)]
    );
}

#[tokio::test]
async fn changed_paths_reports_added_modified_deleted() {
    let repo = MemoryRepository::new();
    repo.write_file("keep.yaml", b"1").await.unwrap();
    repo.write_file("edit.yaml", b"1").await.unwrap();
    repo.write_file("drop.yaml", b"1").await.unwrap();
    repo.commit("base", &[]).await.unwrap();

    repo.write_file("edit.yaml", b"2").await.unwrap();
    repo.remove_file("drop.yaml").await.unwrap();
    repo.write_file("new.yaml", b"1").await.unwrap();
    repo.commit("next", &[]).await.unwrap();

    let changes = repo.changed_paths("HEAD~1", "HEAD").await.unwrap();
    assert_eq!(
        changes,
        vec![
            ChangedPath::new("drop.yaml", ChangeStatus::Deleted),
            ChangedPath::new("edit.yaml", ChangeStatus::Modified),
            ChangedPath::new("new.yaml", ChangeStatus::Added),
        ]
    );
}

#[tokio::test]
async fn changed_paths_accepts_id_prefix_and_rejects_unknown() {
    let repo = MemoryRepository::new();
    repo.write_file("a.yaml", b"1").await.unwrap();
    let id = repo.commit("one", &[]).await.unwrap().unwrap();

    assert!(repo.changed_paths(&id.0[..8], "HEAD").await.unwrap().is_empty());

    let err = repo.changed_paths("HEAD~5", "HEAD").await.unwrap_err();
    assert!(matches!(err, StorageError::UnknownRevision { .. }));
    let err = repo.changed_paths("zzzzzzzz", "HEAD").await.unwrap_err();
    assert!(matches!(err, StorageError::UnknownRevision { .. }));
}

#[tokio::test]
async fn uninitialized_repository_refuses_commit() {
    let repo = MemoryRepository::uninitialized();
    assert!(!repo.is_initialized().await.unwrap());
    let err = repo.commit("x", &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::NotInitialized { .. }));
}

#[tokio::test]
async fn push_is_counted() {
    let repo = MemoryRepository::new();
    repo.push().await.unwrap();
    assert_eq!(repo.push_count(), 1);
}

// ===========================================================================
// ApprovalLog contract tests
// ===========================================================================

#[tokio::test]
async fn approval_history_is_scoped_and_newest_first() {
    let log = MemoryApprovalLog::new();
    let approve = ApprovalRecord::new(
        "staging",
        "production",
        vec!["ch-1".to_string()],
        Some("alice".to_string()),
        ApprovalOutcome::Approved,
    );
    let applied = ApprovalRecord::new(
        "staging",
        "production",
        vec!["ch-1".to_string()],
        Some("alice".to_string()),
        ApprovalOutcome::Applied,
    );
    log.append(approve.clone()).await.unwrap();
    log.append(applied.clone()).await.unwrap();
    log.append(ApprovalRecord::new(
        "dev",
        "staging",
        vec!["ch-1".to_string()],
        None,
        ApprovalOutcome::Approved,
    ))
    .await
    .unwrap();

    let history = log.history("staging", "production").await.unwrap();
    assert_eq!(history, vec![applied, approve]);
    assert_eq!(log.records().len(), 3);
}
