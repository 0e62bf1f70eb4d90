//! Changed channels between two revisions of an environment tree.

use std::collections::BTreeMap;

use chanvcs_state::{ChangeStatus, ChangedPath};
use serde::{Deserialize, Serialize};

use crate::artifact::layout;

/// One channel touched between the two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelta {
    /// Directory name under `<tree>/channels/`.
    pub id: String,
    pub paths: Vec<ChangedPath>,
    /// `channel.xml` was deleted: the channel no longer exists in the tree.
    pub removed: bool,
}

/// Everything that changed in one tree between `from` and `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub environment: String,
    pub from: String,
    pub to: String,
    /// Sorted by id.
    pub channels: Vec<ChannelDelta>,
    /// Environment variable files changed; any channel may be affected.
    pub environment_changed: bool,
    pub environment_files: Vec<String>,
}

impl DeltaReport {
    /// Ids of channels that still exist and need redeploying.
    pub fn changed_ids(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| !c.removed)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.removed)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && !self.environment_changed
    }
}

/// Group `changes` by channel, ignoring anything outside `tree`'s channel
/// and environment directories.
pub fn compute_delta(
    environment: &str,
    tree: &str,
    from: &str,
    to: &str,
    changes: &[ChangedPath],
) -> DeltaReport {
    let mut channels: BTreeMap<String, ChannelDelta> = BTreeMap::new();
    let mut environment_files = Vec::new();

    for change in changes {
        if let Some(id) = layout::channel_id_of(tree, &change.path) {
            let entry = channels.entry(id.clone()).or_insert_with(|| ChannelDelta {
                id: id.clone(),
                paths: Vec::new(),
                removed: false,
            });
            let xml = layout::channel_file(tree, &id, layout::CHANNEL_XML);
            if change.path == xml && change.status == ChangeStatus::Deleted {
                entry.removed = true;
            }
            entry.paths.push(change.clone());
        } else if layout::is_environment_file(tree, &change.path) {
            environment_files.push(change.path.clone());
        }
    }

    DeltaReport {
        environment: environment.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        channels: channels.into_values().collect(),
        environment_changed: !environment_files.is_empty(),
        environment_files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, status: ChangeStatus) -> ChangedPath {
        ChangedPath::new(path, status)
    }

    #[test]
    fn groups_paths_by_channel() {
        let changes = vec![
            change("staging/channels/b/destinations/00-x.yaml", ChangeStatus::Modified),
            change("staging/channels/a/channel.xml", ChangeStatus::Modified),
            change("staging/channels/a/source.yaml", ChangeStatus::Modified),
            change("production/channels/z/channel.xml", ChangeStatus::Modified),
            change("README.md", ChangeStatus::Added),
        ];
        let report = compute_delta("staging", "staging", "HEAD~1", "HEAD", &changes);
        assert_eq!(report.changed_ids(), vec!["a", "b"]);
        assert_eq!(report.channels[0].paths.len(), 2);
        assert!(!report.environment_changed);
        assert!(!report.is_empty());
    }

    #[test]
    fn deleted_channel_xml_marks_removal() {
        let changes = vec![
            change("t/channels/gone/channel.xml", ChangeStatus::Deleted),
            change("t/channels/gone/channel.yaml", ChangeStatus::Deleted),
            change("t/channels/kept/scripts/deploy.js", ChangeStatus::Deleted),
        ];
        let report = compute_delta("t", "t", "a", "b", &changes);
        assert_eq!(report.removed_ids(), vec!["gone"]);
        assert_eq!(report.changed_ids(), vec!["kept"]);
    }

    #[test]
    fn environment_files_are_flagged_separately() {
        let changes = vec![change("t/environments/production.yaml", ChangeStatus::Modified)];
        let report = compute_delta("production", "t", "a", "b", &changes);
        assert!(report.channels.is_empty());
        assert!(report.environment_changed);
        assert_eq!(report.environment_files, vec!["t/environments/production.yaml"]);
    }
}
