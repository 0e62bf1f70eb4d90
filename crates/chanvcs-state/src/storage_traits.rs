//! Storage trait definitions for chanvcs
//!
//! These traits define the collaborators the core engine needs:
//! - `FileStore`: read/write/list files of the artifact working tree
//! - `VersionControl`: commit, enumerate changed paths between revisions, push
//! - `ApprovalLog`: append-only promotion approval history
//!
//! All traits are async and backend-agnostic. Paths are repository-relative
//! and always use `/` as separator. In-memory fakes are provided for testing
//! via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Reject absolute paths, empty segments and parent traversal.
pub fn validate_path(path: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return Err(invalid("must be a relative '/'-separated path"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("relative segments are not allowed")),
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FileStore: artifact working tree
// ---------------------------------------------------------------------------

/// Working-tree file access.
///
/// Guarantees:
/// - `read_file` of an absent path is `Ok(None)`, never an error.
/// - `write_file` creates parent directories and replaces content atomically.
/// - `list_files` returns every file below `prefix`, sorted.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file, `None` when it does not exist.
    async fn read_file(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write (create or replace) a file.
    async fn write_file(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Remove a file. No-op if absent.
    async fn remove_file(&self, path: &str) -> StorageResult<()>;

    /// List files under `prefix` (recursive). An empty prefix lists everything.
    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// VersionControl: commits and revision diffs
// ---------------------------------------------------------------------------

/// Identifier of a commit (git SHA or fake digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// Short form (first 8 chars).
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a path changed between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

/// A single changed path between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: String,
    pub status: ChangeStatus,
}

impl ChangedPath {
    pub fn new(path: impl Into<String>, status: ChangeStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// Version-control collaborator.
///
/// Only the operations the core engine relies on; status, pull and log are
/// boundary-layer concerns.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Whether the working tree is under version control.
    async fn is_initialized(&self) -> StorageResult<bool>;

    /// Stage `paths` (files or directories; empty means everything) and
    /// commit. Returns `None` when there was nothing to commit.
    async fn commit(&self, message: &str, paths: &[String]) -> StorageResult<Option<CommitId>>;

    /// Paths that differ between `from` and `to`.
    async fn changed_paths(&self, from: &str, to: &str) -> StorageResult<Vec<ChangedPath>>;

    /// Push the current branch to its upstream.
    async fn push(&self) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// ApprovalLog: promotion approvals and audit trail
// ---------------------------------------------------------------------------

/// Decision or result recorded for a promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// Promotion may proceed.
    Approved,
    /// Promotion must not proceed.
    Rejected,
    /// Promotion was written into the target environment.
    Applied,
    /// Promotion was attempted and failed.
    Failed,
}

impl ApprovalOutcome {
    /// Approved and Rejected are decisions; Applied and Failed are results.
    pub fn is_decision(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved | ApprovalOutcome::Rejected)
    }
}

/// A single approval-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub source_env: String,
    pub target_env: String,
    pub channel_ids: Vec<String>,
    pub approved_by: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Approval check was bypassed.
    pub forced: bool,
    pub outcome: ApprovalOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ApprovalRecord {
    pub fn new(
        source_env: impl Into<String>,
        target_env: impl Into<String>,
        channel_ids: Vec<String>,
        approved_by: Option<String>,
        outcome: ApprovalOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_env: source_env.into(),
            target_env: target_env.into(),
            channel_ids,
            approved_by,
            timestamp: Utc::now(),
            forced: false,
            outcome,
            note: None,
        }
    }

    /// Mark the record as a forced (approval-bypassing) entry.
    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether this record applies to `channel_id`.
    pub fn covers(&self, channel_id: &str) -> bool {
        self.channel_ids.iter().any(|id| id == channel_id)
    }
}

/// Append-only approval history.
#[async_trait]
pub trait ApprovalLog: Send + Sync {
    /// Append a record.
    async fn append(&self, record: ApprovalRecord) -> StorageResult<()>;

    /// All records for a source/target pair, newest first.
    async fn history(&self, source_env: &str, target_env: &str)
        -> StorageResult<Vec<ApprovalRecord>>;
}
