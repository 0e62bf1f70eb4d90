//! Approval-gated promotion of channels between environments.
//!
//! Each channel of a promotion walks its own state machine:
//!
//! ```text
//! requested -> validated -> approved -> applied
//!     |            |            \-----> failed
//!     |            \--> rejected
//!     \--> failed
//! ```

pub mod gate;
pub mod pipeline;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::ChannelDiff;
use crate::domain::error::{ChanvcsError, Result};

pub use gate::{GateDecision, PromotionGate};
pub use pipeline::PromotionPipeline;

/// State of one channel within a promotion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    Requested,
    Validated,
    Approved,
    Rejected,
    Applied,
    Failed,
}

impl PromotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionState::Requested => "requested",
            PromotionState::Validated => "validated",
            PromotionState::Approved => "approved",
            PromotionState::Rejected => "rejected",
            PromotionState::Applied => "applied",
            PromotionState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: PromotionState) -> bool {
        use PromotionState::*;
        matches!(
            (self, next),
            (Requested, Validated)
                | (Requested, Failed)
                | (Validated, Approved)
                | (Validated, Rejected)
                | (Approved, Applied)
                | (Approved, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PromotionState::Rejected | PromotionState::Applied | PromotionState::Failed
        )
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to promote and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub source_env: String,
    pub target_env: String,
    /// Empty promotes every channel stored in the source tree.
    pub channel_ids: Vec<String>,
    pub requested_by: Option<String>,
    /// Validate and report the plan without writing anything.
    pub dry_run: bool,
    /// Skip the approval check. Recorded in the approval log.
    pub force: bool,
    /// Push after committing.
    pub push: bool,
    /// Write resolved values into the target tree instead of the template.
    pub materialize: bool,
    pub message: Option<String>,
}

impl PromotionRequest {
    pub fn new(source_env: impl Into<String>, target_env: impl Into<String>) -> Self {
        Self {
            source_env: source_env.into(),
            target_env: target_env.into(),
            ..Self::default()
        }
    }

    pub fn with_channels(mut self, ids: Vec<String>) -> Self {
        self.channel_ids = ids;
        self
    }
}

/// Progress and outcome of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPromotion {
    pub channel_id: String,
    pub state: PromotionState,
    /// Every state the channel passed through, in order.
    pub history: Vec<PromotionState>,
    pub warnings: Vec<String>,
    /// Changes against the target's stored copy; `None` for a new channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChannelDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelPromotion {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state: PromotionState::Requested,
            history: vec![PromotionState::Requested],
            warnings: Vec::new(),
            changes: None,
            error: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: PromotionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ChanvcsError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub fn succeeded(&self) -> bool {
        !matches!(
            self.state,
            PromotionState::Failed | PromotionState::Rejected
        )
    }
}

/// Outcome of a promotion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub promotion_id: Uuid,
    pub source_env: String,
    pub target_env: String,
    pub started_at: DateTime<Utc>,
    /// False when any channel failed or was rejected.
    pub success: bool,
    pub dry_run: bool,
    pub channels: Vec<ChannelPromotion>,
    /// Promotion-wide warnings.
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub pushed: bool,
}

impl PromotionResult {
    pub fn channel(&self, id: &str) -> Option<&ChannelPromotion> {
        self.channels.iter().find(|c| c.channel_id == id)
    }

    pub fn count(&self, state: PromotionState) -> usize {
        self.channels.iter().filter(|c| c.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_path_to_applied() {
        let mut channel = ChannelPromotion::new("c");
        channel.transition(PromotionState::Validated).unwrap();
        channel.transition(PromotionState::Approved).unwrap();
        channel.transition(PromotionState::Applied).unwrap();
        assert_eq!(
            channel.history,
            vec![
                PromotionState::Requested,
                PromotionState::Validated,
                PromotionState::Approved,
                PromotionState::Applied,
            ]
        );
        assert!(channel.state.is_terminal());
        assert!(channel.succeeded());
    }

    #[test]
    fn illegal_transitions_are_errors() {
        let mut channel = ChannelPromotion::new("c");
        let err = channel.transition(PromotionState::Applied).unwrap_err();
        assert!(matches!(
            err,
            ChanvcsError::InvalidTransition { ref from, ref to } if from == "requested" && to == "applied"
        ));
        channel.transition(PromotionState::Validated).unwrap();
        channel.transition(PromotionState::Rejected).unwrap();
        assert!(channel.transition(PromotionState::Approved).is_err());
        assert!(!channel.succeeded());
    }

    #[test]
    fn validation_failure_goes_straight_to_failed() {
        let mut channel = ChannelPromotion::new("c");
        channel.transition(PromotionState::Failed).unwrap();
        assert!(channel.transition(PromotionState::Validated).is_err());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&PromotionState::Validated).unwrap();
        assert_eq!(json, "\"validated\"");
    }
}
