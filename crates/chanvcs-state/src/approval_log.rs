//! JSON-lines file backend for [`ApprovalLog`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::storage_traits::{ApprovalLog, ApprovalRecord, StorageResult};

/// Approval history stored as one JSON object per line.
///
/// The file is only ever appended to; history is never rewritten.
#[derive(Debug, Clone)]
pub struct JsonlApprovalLog {
    path: PathBuf,
}

impl JsonlApprovalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StorageResult<Vec<ApprovalRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ApprovalRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %e, "skipping unreadable approval record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ApprovalLog for JsonlApprovalLog {
    async fn append(&self, record: ApprovalRecord) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(id = %record.id, outcome = ?record.outcome, "approval record appended");
        Ok(())
    }

    async fn history(
        &self,
        source_env: &str,
        target_env: &str,
    ) -> StorageResult<Vec<ApprovalRecord>> {
        let mut records: Vec<ApprovalRecord> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| r.source_env == source_env && r.target_env == target_env)
            .collect();
        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::ApprovalOutcome;

    #[tokio::test]
    async fn append_and_history_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlApprovalLog::new(dir.path().join("audit/approvals.jsonl"));

        let first = ApprovalRecord::new(
            "staging",
            "production",
            vec!["a".to_string()],
            Some("alice".to_string()),
            ApprovalOutcome::Approved,
        );
        let second = ApprovalRecord::new(
            "staging",
            "production",
            vec!["a".to_string()],
            Some("bob".to_string()),
            ApprovalOutcome::Rejected,
        );
        let other = ApprovalRecord::new(
            "dev",
            "staging",
            vec!["a".to_string()],
            None,
            ApprovalOutcome::Approved,
        );
        log.append(first.clone()).await.unwrap();
        log.append(second.clone()).await.unwrap();
        log.append(other).await.unwrap();

        let history = log.history("staging", "production").await.unwrap();
        assert_eq!(history, vec![second, first]);
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlApprovalLog::new(dir.path().join("none.jsonl"));
        assert!(log.history("a", "b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.jsonl");
        let log = JsonlApprovalLog::new(&path);
        log.append(ApprovalRecord::new(
            "a",
            "b",
            vec![],
            None,
            ApprovalOutcome::Applied,
        ))
        .await
        .unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(log.history("a", "b").await.unwrap().len(), 1);
    }
}
