//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRepository` (a `FileStore` + `VersionControl` pair with
//! commit snapshots) and `MemoryApprovalLog`, satisfying the trait contracts
//! without touching disk or spawning git.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

type Snapshot = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
struct MemoryCommit {
    id: CommitId,
    message: String,
    snapshot: Snapshot,
}

/// In-memory working tree plus linear commit history.
///
/// Revisions accepted by `changed_paths`: a full commit id, a unique id
/// prefix of at least 4 chars, `HEAD`, or `HEAD~N`.
#[derive(Debug)]
pub struct MemoryRepository {
    files: Mutex<Snapshot>,
    commits: Mutex<Vec<MemoryCommit>>,
    pushes: Mutex<usize>,
    initialized: bool,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            commits: Mutex::new(Vec::new()),
            pushes: Mutex::new(0),
            initialized: true,
        }
    }

    /// A repository whose `is_initialized` reports false.
    pub fn uninitialized() -> Self {
        Self {
            initialized: false,
            ..Self::new()
        }
    }

    /// Most recent commit, if any.
    pub fn head(&self) -> Option<CommitId> {
        self.commits.lock().unwrap().last().map(|c| c.id.clone())
    }

    /// Commit messages, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.message.clone())
            .collect()
    }

    /// Number of successful `push` calls.
    pub fn push_count(&self) -> usize {
        *self.pushes.lock().unwrap()
    }

    /// Copy of the current working tree.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }

    fn resolve_revision(&self, revision: &str) -> StorageResult<Snapshot> {
        let commits = self.commits.lock().unwrap();
        let unknown = || StorageError::UnknownRevision {
            revision: revision.to_string(),
        };

        if let Some(rest) = revision.strip_prefix("HEAD") {
            let back = match rest {
                "" => 0,
                _ => rest
                    .strip_prefix('~')
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(unknown)?,
            };
            let index = commits.len().checked_sub(back + 1).ok_or_else(unknown)?;
            return Ok(commits[index].snapshot.clone());
        }

        if revision.len() < 4 {
            return Err(unknown());
        }
        let mut matches = commits.iter().filter(|c| c.id.0.starts_with(revision));
        match (matches.next(), matches.next()) {
            (Some(commit), None) => Ok(commit.snapshot.clone()),
            _ => Err(unknown()),
        }
    }
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
}

#[async_trait]
impl FileStore for MemoryRepository {
    async fn read_file(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> StorageResult<()> {
        validate_path(path)?;
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .filter(|p| prefix.is_empty() || under(p, prefix))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VersionControl for MemoryRepository {
    async fn is_initialized(&self) -> StorageResult<bool> {
        Ok(self.initialized)
    }

    async fn commit(&self, message: &str, paths: &[String]) -> StorageResult<Option<CommitId>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized {
                root: "memory".to_string(),
            });
        }
        let files = self.files.lock().unwrap().clone();
        let mut commits = self.commits.lock().unwrap();
        let parent = commits
            .last()
            .map(|c| c.snapshot.clone())
            .unwrap_or_default();

        let snapshot = if paths.is_empty() {
            files
        } else {
            let mut next = parent.clone();
            next.retain(|p, _| !paths.iter().any(|prefix| under(p, prefix)));
            for (path, data) in files {
                if paths.iter().any(|prefix| under(&path, prefix)) {
                    next.insert(path, data);
                }
            }
            next
        };

        if snapshot == parent {
            return Ok(None);
        }

        let mut hasher = Sha256::new();
        hasher.update(commits.len().to_le_bytes());
        hasher.update(message.as_bytes());
        for (path, data) in &snapshot {
            hasher.update(path.as_bytes());
            hasher.update(data);
        }
        let id = CommitId(hex::encode(hasher.finalize()));
        commits.push(MemoryCommit {
            id: id.clone(),
            message: message.to_string(),
            snapshot,
        });
        Ok(Some(id))
    }

    async fn changed_paths(&self, from: &str, to: &str) -> StorageResult<Vec<ChangedPath>> {
        let before = self.resolve_revision(from)?;
        let after = self.resolve_revision(to)?;

        let mut changes = Vec::new();
        for (path, data) in &after {
            match before.get(path) {
                None => changes.push(ChangedPath::new(path.clone(), ChangeStatus::Added)),
                Some(old) if old != data => {
                    changes.push(ChangedPath::new(path.clone(), ChangeStatus::Modified))
                }
                Some(_) => {}
            }
        }
        for path in before.keys() {
            if !after.contains_key(path) {
                changes.push(ChangedPath::new(path.clone(), ChangeStatus::Deleted));
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    async fn push(&self) -> StorageResult<()> {
        *self.pushes.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryApprovalLog
// ---------------------------------------------------------------------------

/// In-memory approval log backed by a `Vec<ApprovalRecord>` (oldest first).
#[derive(Debug, Default)]
pub struct MemoryApprovalLog {
    records: Mutex<Vec<ApprovalRecord>>,
}

impl MemoryApprovalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first.
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalLog for MemoryApprovalLog {
    async fn append(&self, record: ApprovalRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn history(
        &self,
        source_env: &str,
        target_env: &str,
    ) -> StorageResult<Vec<ApprovalRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.source_env == source_env && r.target_env == target_env)
            .cloned()
            .collect())
    }
}
