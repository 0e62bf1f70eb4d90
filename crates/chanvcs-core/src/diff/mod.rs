//! Structural comparison of channel artifacts.
//!
//! This module provides:
//! - Field-by-field artifact diffing (`ChannelDiff`, `diff_artifacts`)
//! - Credential detection and masking (`secrets` submodule)
//! - Inter-channel reference graph (`graph` submodule)

pub mod graph;
pub mod secrets;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::artifact::{ConnectorFiles, DecomposedArtifact};

/// How a field differs between the stored and the live artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Present live, absent in the store.
    Added,
    /// Present in the store, absent live.
    Removed,
    Modified,
}

/// A single field-level difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// e.g. `destinations[1].properties/host`, `scripts.deploy`.
    pub path: String,
    pub kind: ChangeKind,
    /// Stored value.
    pub before: Option<String>,
    /// Live value.
    pub after: Option<String>,
}

/// Result of comparing one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDiff {
    pub channel_id: String,
    pub identical: bool,
    pub changes: Vec<Change>,
}

impl ChannelDiff {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

/// Flatten an artifact into ordered `path -> value` pairs.
pub fn flatten_artifact(artifact: &DecomposedArtifact) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let meta = &artifact.metadata;
    out.insert("metadata.id".to_string(), meta.id.clone());
    out.insert("metadata.name".to_string(), meta.name.clone());
    if let Some(revision) = meta.revision {
        out.insert("metadata.revision".to_string(), revision.to_string());
    }
    if let Some(description) = &meta.description {
        out.insert("metadata.description".to_string(), description.clone());
    }
    if let Some(enabled) = meta.enabled {
        out.insert("metadata.enabled".to_string(), enabled.to_string());
    }

    for (label, connector) in artifact.connectors() {
        flatten_connector(&mut out, &label, connector);
    }

    for (name, script) in artifact.scripts.entries() {
        if let Some(script) = script {
            out.insert(format!("scripts.{name}"), script.clone());
        }
    }
    out
}

fn flatten_connector(out: &mut IndexMap<String, String>, prefix: &str, c: &ConnectorFiles) {
    let mut put = |field: &str, value: String| {
        out.insert(format!("{prefix}.{field}"), value);
    };
    put("name", c.name.clone());
    put("id", c.id.clone());
    put("transport_kind", c.transport_kind.clone());
    put("mode", c.mode.clone());
    put("enabled", c.enabled.to_string());
    if let Some(wait) = c.wait_for_previous {
        put("wait_for_previous", wait.to_string());
    }
    put("properties_kind", c.properties_kind.clone());
    if let Some(version) = &c.properties_version {
        put("properties_version", version.clone());
    }
    for (path, value) in c.property_leaves() {
        put(&format!("properties/{path}"), value.to_string());
    }
    for (list_name, steps) in c.step_lists() {
        let Some(steps) = steps else { continue };
        for (i, step) in steps.iter().enumerate() {
            let step_prefix = format!("{list_name}[{i}]");
            put(&format!("{step_prefix}.kind"), step.kind.clone());
            if let Some(version) = &step.kind_version {
                put(&format!("{step_prefix}.kind_version"), version.clone());
            }
            put(&format!("{step_prefix}.name"), step.name.clone());
            put(
                &format!("{step_prefix}.sequence_number"),
                step.sequence_number.to_string(),
            );
            put(&format!("{step_prefix}.enabled"), step.enabled.to_string());
            if let Some(operator) = &step.operator {
                put(&format!("{step_prefix}.operator"), operator.clone());
            }
            put(&format!("{step_prefix}.body"), step.body.clone());
        }
    }
}

/// Compare a stored artifact (`before`) with a live one (`after`).
pub fn diff_artifacts(stored: &DecomposedArtifact, live: &DecomposedArtifact) -> ChannelDiff {
    let before = flatten_artifact(stored);
    let after = flatten_artifact(live);
    let mut changes = Vec::new();

    for (path, old) in &before {
        match after.get(path) {
            None => changes.push(Change {
                path: path.clone(),
                kind: ChangeKind::Removed,
                before: Some(old.clone()),
                after: None,
            }),
            Some(new) if new != old => changes.push(Change {
                path: path.clone(),
                kind: ChangeKind::Modified,
                before: Some(old.clone()),
                after: Some(new.clone()),
            }),
            Some(_) => {}
        }
    }
    for (path, new) in &after {
        if !before.contains_key(path) {
            changes.push(Change {
                path: path.clone(),
                kind: ChangeKind::Added,
                before: None,
                after: Some(new.clone()),
            });
        }
    }

    ChannelDiff {
        channel_id: live.metadata.id.clone(),
        identical: changes.is_empty(),
        changes,
    }
}
