//! Promotion gate: path rules and approval checks.
//!
//! A promotion must follow a configured `from -> to` path when any path is
//! configured. Targets with `require_approval = true` need, per channel, a
//! newest decision from the same source that is `approved`. `force`
//! bypasses the approval check and is logged as such.

use std::sync::Arc;

use chanvcs_state::{ApprovalLog, ApprovalOutcome, ApprovalRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::PromotionRequest;
use crate::config::ChanvcsConfig;
use crate::domain::error::{ChanvcsError, Result};

/// Why a channel may or may not proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// The target does not require approval.
    NotRequired,
    Approved { by: Option<String> },
    /// Approval bypassed with `force`.
    Forced,
    Rejected { reason: String },
}

impl GateDecision {
    pub fn allows(&self) -> bool {
        !matches!(self, GateDecision::Rejected { .. })
    }
}

/// Approval gate backed by an approval log.
#[derive(Clone)]
pub struct PromotionGate {
    approvals: Arc<dyn ApprovalLog>,
    config: ChanvcsConfig,
}

impl PromotionGate {
    pub fn new(approvals: Arc<dyn ApprovalLog>, config: ChanvcsConfig) -> Self {
        Self { approvals, config }
    }

    pub fn approvals(&self) -> &dyn ApprovalLog {
        self.approvals.as_ref()
    }

    /// `PromotionGateRejected` when `source -> target` is not a configured
    /// path. Both environments must be known.
    pub fn check_path(&self, source: &str, target: &str) -> Result<()> {
        self.config.environment(source)?;
        self.config.environment(target)?;
        if source == target {
            return Err(ChanvcsError::PromotionGateRejected(format!(
                "source and target are both '{source}'"
            )));
        }
        if !self.config.allows_promotion(source, target) {
            return Err(ChanvcsError::PromotionGateRejected(format!(
                "no promotion path {source} -> {target} is configured"
            )));
        }
        Ok(())
    }

    /// Decide whether `channel_id` may be promoted.
    pub async fn evaluate(
        &self,
        source: &str,
        target: &str,
        channel_id: &str,
        force: bool,
    ) -> Result<GateDecision> {
        if force {
            warn!(source = %source, target = %target, channel_id = %channel_id, "approval bypassed");
            return Ok(GateDecision::Forced);
        }
        if !self.config.environment(target)?.require_approval {
            return Ok(GateDecision::NotRequired);
        }

        let history = self.approvals.history(source, target).await?;
        let newest = history
            .iter()
            .find(|r| r.outcome.is_decision() && r.covers(channel_id));
        Ok(match newest {
            Some(record) if record.outcome == ApprovalOutcome::Approved => GateDecision::Approved {
                by: record.approved_by.clone(),
            },
            Some(record) => GateDecision::Rejected {
                reason: match (&record.approved_by, &record.note) {
                    (Some(by), Some(note)) => format!("rejected by {by}: {note}"),
                    (Some(by), None) => format!("rejected by {by}"),
                    (None, Some(note)) => format!("rejected: {note}"),
                    (None, None) => "rejected".to_string(),
                },
            },
            None => GateDecision::Rejected {
                reason: format!("no approval recorded for {source} -> {target}"),
            },
        })
    }

    /// Record an approval decision.
    pub async fn decide(
        &self,
        source: &str,
        target: &str,
        channel_ids: Vec<String>,
        by: Option<String>,
        approved: bool,
        note: Option<String>,
    ) -> Result<ApprovalRecord> {
        self.check_path(source, target)?;
        let outcome = if approved {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Rejected
        };
        let mut record = ApprovalRecord::new(source, target, channel_ids, by, outcome);
        if let Some(note) = note {
            record = record.with_note(note);
        }
        self.approvals.append(record.clone()).await?;
        info!(
            source = %source,
            target = %target,
            channels = record.channel_ids.len(),
            outcome = ?record.outcome,
            "approval recorded"
        );
        Ok(record)
    }

    /// Record the result of applying (or failing to apply) a channel.
    pub async fn record_outcome(
        &self,
        request: &PromotionRequest,
        channel_id: &str,
        outcome: ApprovalOutcome,
        note: Option<String>,
    ) -> Result<()> {
        let mut record = ApprovalRecord::new(
            request.source_env.as_str(),
            request.target_env.as_str(),
            vec![channel_id.to_string()],
            request.requested_by.clone(),
            outcome,
        );
        if request.force {
            record = record.forced();
        }
        if let Some(note) = note {
            record = record.with_note(note);
        }
        self.approvals.append(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanvcs_state::fakes::MemoryApprovalLog;

    fn config() -> ChanvcsConfig {
        ChanvcsConfig::from_toml_str(
            "[environments.staging]\n[environments.production]\nrequire_approval = true\n[[promotion_paths]]\nfrom = \"staging\"\nto = \"production\"\n",
        )
        .unwrap()
    }

    fn gate() -> (Arc<MemoryApprovalLog>, PromotionGate) {
        let log = Arc::new(MemoryApprovalLog::new());
        (log.clone(), PromotionGate::new(log, config()))
    }

    #[test]
    fn path_rules() {
        let (_, gate) = gate();
        assert!(gate.check_path("staging", "production").is_ok());
        assert!(matches!(
            gate.check_path("production", "staging"),
            Err(ChanvcsError::PromotionGateRejected(_))
        ));
        assert!(matches!(
            gate.check_path("staging", "qa"),
            Err(ChanvcsError::EnvironmentUnknown(_))
        ));
    }

    #[tokio::test]
    async fn approval_required_and_newest_decision_wins() {
        let (_, gate) = gate();
        let decision = gate.evaluate("staging", "production", "c1", false).await.unwrap();
        assert!(!decision.allows());

        gate.decide("staging", "production", vec!["c1".into()], Some("ops".into()), true, None)
            .await
            .unwrap();
        assert_eq!(
            gate.evaluate("staging", "production", "c1", false).await.unwrap(),
            GateDecision::Approved {
                by: Some("ops".to_string())
            }
        );
        assert!(!gate
            .evaluate("staging", "production", "c2", false)
            .await
            .unwrap()
            .allows());

        gate.decide(
            "staging",
            "production",
            vec!["c1".into()],
            Some("qa".into()),
            false,
            Some("failing checks".into()),
        )
        .await
        .unwrap();
        assert_eq!(
            gate.evaluate("staging", "production", "c1", false).await.unwrap(),
            GateDecision::Rejected {
                reason: "rejected by qa: failing checks".to_string()
            }
        );
    }

    #[tokio::test]
    async fn applied_records_do_not_count_as_decisions() {
        let (_, gate) = gate();
        gate.decide("staging", "production", vec!["c1".into()], None, true, None)
            .await
            .unwrap();
        gate.record_outcome(
            &PromotionRequest::new("staging", "production"),
            "c1",
            ApprovalOutcome::Applied,
            None,
        )
        .await
        .unwrap();
        assert!(gate
            .evaluate("staging", "production", "c1", false)
            .await
            .unwrap()
            .allows());
    }

    #[tokio::test]
    async fn force_bypasses_and_unapproved_targets_pass() {
        let (_, gate) = gate();
        assert_eq!(
            gate.evaluate("staging", "production", "c1", true).await.unwrap(),
            GateDecision::Forced
        );
        assert_eq!(
            gate.evaluate("production", "staging", "c1", false).await.unwrap(),
            GateDecision::NotRequired
        );
    }
}
