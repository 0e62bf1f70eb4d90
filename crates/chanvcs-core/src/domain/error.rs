//! Domain-level error taxonomy for chanvcs.

use chanvcs_state::StorageError;

/// chanvcs domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ChanvcsError {
    /// A required file is absent. Environment and artifact loaders treat
    /// absence as empty; this surfaces only where a file was asked for by name.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid configuration in {path}: {reason}")]
    ConfigurationInvalid { path: String, reason: String },

    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    #[error("artifact shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("unresolved variables: {}", names.join(", "))]
    UnresolvedVariable { names: Vec<String> },

    #[error("circular variable reference: {chain}")]
    CircularVariableReference { chain: String },

    #[error("variable nesting depth {limit} exceeded while expanding '{token}'")]
    NestingDepthExceeded { limit: usize, token: String },

    #[error("promotion rejected: {0}")]
    PromotionGateRejected(String),

    #[error("invalid promotion transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("promotion {0} not found")]
    PromotionNotFound(String),

    #[error("channel '{id}' not found in {location}")]
    ChannelNotFound { id: String, location: String },

    #[error("channel reference cycle involving: {}", channels.join(", "))]
    DependencyCycle { channels: Vec<String> },

    #[error("environment '{0}' is not configured")]
    EnvironmentUnknown(String),

    #[error("artifact store not initialized: {0}")]
    StoreNotInitialized(String),

    #[error("{failed} of {total} batch items failed")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("engine error: {0}")]
    Engine(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ChanvcsError {
    fn from(err: serde_json::Error) -> Self {
        ChanvcsError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChanvcsError {
    fn from(err: serde_yaml::Error) -> Self {
        ChanvcsError::Serialization(err.to_string())
    }
}

/// Result type for chanvcs domain operations.
pub type Result<T> = std::result::Result<T, ChanvcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_lists_every_name() {
        let err = ChanvcsError::UnresolvedVariable {
            names: vec!["DB_HOST".to_string(), "DB_PORT".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("DB_HOST"));
        assert!(msg.contains("DB_PORT"));
    }

    #[test]
    fn circular_reference_shows_chain() {
        let err = ChanvcsError::CircularVariableReference {
            chain: "A -> B -> A".to_string(),
        };
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn storage_error_converts() {
        let err: ChanvcsError = StorageError::PushUnsupported.into();
        assert!(err.to_string().contains("storage error"));
    }
}
