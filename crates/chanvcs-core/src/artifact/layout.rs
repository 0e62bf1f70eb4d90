//! Paths inside an environment tree.
//!
//! ```text
//! <tree>/environments/defaults.yaml
//! <tree>/environments/<env>.yaml
//! <tree>/channels/<id>/channel.xml
//! <tree>/channels/<id>/channel.yaml
//! <tree>/channels/<id>/source.yaml
//! <tree>/channels/<id>/destinations/NN-<slug>.yaml
//! <tree>/channels/<id>/scripts/<name>.js
//! ```

use crate::domain::error::{ChanvcsError, Result};

pub const CHANNELS_DIR: &str = "channels";
pub const ENVIRONMENTS_DIR: &str = "environments";
pub const DEFAULTS_ENVIRONMENT: &str = "defaults";

pub const CHANNEL_XML: &str = "channel.xml";
pub const CHANNEL_YAML: &str = "channel.yaml";
pub const SOURCE_YAML: &str = "source.yaml";
pub const DESTINATIONS_DIR: &str = "destinations";
pub const SCRIPTS_DIR: &str = "scripts";

/// Join a tree root and a relative path. An empty tree is the store root.
pub fn join(tree: &str, rel: &str) -> String {
    let tree = tree.trim_end_matches('/');
    if tree.is_empty() {
        rel.to_string()
    } else {
        format!("{tree}/{rel}")
    }
}

pub fn environment_file(tree: &str, env: &str) -> String {
    join(tree, &format!("{ENVIRONMENTS_DIR}/{env}.yaml"))
}

pub fn environments_dir(tree: &str) -> String {
    join(tree, ENVIRONMENTS_DIR)
}

pub fn channels_dir(tree: &str) -> String {
    join(tree, CHANNELS_DIR)
}

pub fn channel_dir(tree: &str, id: &str) -> String {
    join(tree, &format!("{CHANNELS_DIR}/{id}"))
}

pub fn channel_file(tree: &str, id: &str, file: &str) -> String {
    format!("{}/{file}", channel_dir(tree, id))
}

pub fn script_file(tree: &str, id: &str, script: &str) -> String {
    channel_file(tree, id, &format!("{SCRIPTS_DIR}/{script}.js"))
}

/// `NN-<slug>.yaml`; the index prefix keeps deployment order on disk.
pub fn destination_file_name(index: usize, name: &str) -> String {
    format!("{index:02}-{}.yaml", slug(name))
}

/// Deployment index of a destination file path (`.../NN-<slug>.yaml`).
pub fn destination_index(path: &str) -> Option<usize> {
    let file = path.rsplit('/').next()?;
    let (index, _) = file.split_once('-')?;
    index.parse().ok()
}

/// Lowercase alphanumerics with single dashes in between.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "destination".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Channel id of a path below `<tree>/channels/`, if any.
pub fn channel_id_of(tree: &str, path: &str) -> Option<String> {
    let prefix = format!("{}/", channels_dir(tree));
    let rest = path.strip_prefix(&prefix)?;
    let (id, _) = rest.split_once('/')?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Whether `path` is an environment variable file of `tree`.
pub fn is_environment_file(tree: &str, path: &str) -> bool {
    let prefix = format!("{}/", environments_dir(tree));
    path.strip_prefix(&prefix)
        .is_some_and(|rest| !rest.contains('/') && rest.ends_with(".yaml"))
}

/// Channel ids become directory names.
pub fn validate_channel_id(id: &str) -> Result<()> {
    let bad = |reason: &str| {
        Err(ChanvcsError::MalformedArtifact(format!(
            "channel id '{id}' {reason}"
        )))
    };
    if id.trim().is_empty() {
        return bad("is empty");
    }
    if id == "." || id == ".." {
        return bad("is a relative path segment");
    }
    if id
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
    {
        return bad("contains path separators or control characters");
    }
    Ok(())
}
