//! Error types for chanvcs-state

use thiserror::Error;

/// Errors produced by storage backends (file store, version control,
/// approval log).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Path escapes the repository root or is otherwise unusable
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Revision could not be resolved by the version-control backend
    #[error("unknown revision: {revision}")]
    UnknownRevision { revision: String },

    /// Working tree is not under version control
    #[error("repository not initialized at {root}")]
    NotInitialized { root: String },

    /// A git subprocess exited with a failure status
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// Backend has no remote to push to
    #[error("push is not supported by this backend")]
    PushUnsupported,

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying filesystem or process error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
