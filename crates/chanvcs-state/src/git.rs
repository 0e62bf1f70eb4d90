//! Git-backed [`VersionControl`] driven through the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::{ChangeStatus, ChangedPath, CommitId, StorageResult, VersionControl};

/// Version control over a git working tree.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    root: PathBuf,
    remote: Option<String>,
}

impl GitVersionControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: None,
        }
    }

    /// Push to `remote` instead of the branch upstream.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> StorageResult<Output> {
        debug!(args = ?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(StorageError::Io)
    }

    async fn git_ok(&self, args: &[&str]) -> StorageResult<String> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(StorageError::Git {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse `git diff --name-status` output. Renames become a deletion of the
/// old path plus an addition of the new one.
pub fn parse_name_status(output: &str) -> Vec<ChangedPath> {
    let mut changes = Vec::new();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let Some(code) = fields.next() else { continue };
        let paths: Vec<&str> = fields.collect();
        match (code.chars().next(), paths.as_slice()) {
            (Some('A'), [path]) => changes.push(ChangedPath::new(*path, ChangeStatus::Added)),
            (Some('D'), [path]) => changes.push(ChangedPath::new(*path, ChangeStatus::Deleted)),
            (Some('M' | 'T'), [path]) => {
                changes.push(ChangedPath::new(*path, ChangeStatus::Modified))
            }
            (Some('R'), [old, new]) => {
                changes.push(ChangedPath::new(*old, ChangeStatus::Deleted));
                changes.push(ChangedPath::new(*new, ChangeStatus::Added));
            }
            (Some('C'), [_, new]) => changes.push(ChangedPath::new(*new, ChangeStatus::Added)),
            _ => {}
        }
    }
    changes
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn is_initialized(&self) -> StorageResult<bool> {
        Ok(self
            .git(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false))
    }

    async fn commit(&self, message: &str, paths: &[String]) -> StorageResult<Option<CommitId>> {
        let mut add: Vec<&str> = vec!["add", "-A", "--"];
        if paths.is_empty() {
            add.push(".");
        } else {
            add.extend(paths.iter().map(String::as_str));
        }
        self.git_ok(&add).await?;

        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            debug!("nothing staged, skipping commit");
            return Ok(None);
        }

        self.git_ok(&["commit", "-m", message]).await?;
        let sha = self.git_ok(&["rev-parse", "HEAD"]).await?.trim().to_string();
        info!(commit = %sha, "committed");
        Ok(Some(CommitId(sha)))
    }

    async fn changed_paths(&self, from: &str, to: &str) -> StorageResult<Vec<ChangedPath>> {
        let output = self
            .git(&["diff", "--name-status", "-M", from, to])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("unknown revision") || stderr.contains("bad revision") {
                let revision = if stderr.contains(from) { from } else { to };
                return Err(StorageError::UnknownRevision {
                    revision: revision.to_string(),
                });
            }
            return Err(StorageError::Git {
                command: "diff".to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(parse_name_status(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn push(&self) -> StorageResult<()> {
        match &self.remote {
            Some(remote) => self.git_ok(&["push", remote.as_str()]).await?,
            None => self.git_ok(&["push"]).await?,
        };
        info!("pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn parse_name_status_handles_all_codes() {
        let out = "A\tt/channels/a/channel.xml\nM\tt/channels/b/source.yaml\nD\tt/channels/c/channel.xml\nR087\told/x.yaml\tnew/x.yaml\n";
        let changes = parse_name_status(out);
        assert_eq!(changes.len(), 5);
        assert_eq!(changes[0].status, ChangeStatus::Added);
        assert_eq!(changes[1].status, ChangeStatus::Modified);
        assert_eq!(changes[2].status, ChangeStatus::Deleted);
        assert_eq!(changes[3], ChangedPath::new("old/x.yaml", ChangeStatus::Deleted));
        assert_eq!(changes[4], ChangedPath::new("new/x.yaml", ChangeStatus::Added));
    }

    #[tokio::test]
    async fn is_initialized_true_for_repo_false_otherwise() {
        let repo = make_git_repo();
        assert!(GitVersionControl::new(repo.path()).is_initialized().await.unwrap());

        let plain = tempfile::tempdir().unwrap();
        assert!(!GitVersionControl::new(plain.path()).is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn commit_then_changed_paths_between_revisions() {
        let repo = make_git_repo();
        let vcs = GitVersionControl::new(repo.path());
        let base = run_git(repo.path(), &["rev-parse", "HEAD"]);

        std::fs::create_dir_all(repo.path().join("t/channels/a")).unwrap();
        std::fs::write(repo.path().join("t/channels/a/channel.yaml"), "id: a\n").unwrap();
        let first = vcs
            .commit("export a", &["t/channels/a".to_string()])
            .await
            .unwrap()
            .expect("commit created");
        assert_eq!(first.as_str().len(), 40);

        let changes = vcs.changed_paths(&base, first.as_str()).await.unwrap();
        assert_eq!(
            changes,
            vec![ChangedPath::new("t/channels/a/channel.yaml", ChangeStatus::Added)]
        );
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_returns_none() {
        let repo = make_git_repo();
        let vcs = GitVersionControl::new(repo.path());
        assert!(vcs.commit("noop", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn changed_paths_unknown_revision_errors() {
        let repo = make_git_repo();
        let vcs = GitVersionControl::new(repo.path());
        let err = vcs.changed_paths("HEAD", "no-such-ref").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnknownRevision { .. } | StorageError::Git { .. }
        ));
    }
}
