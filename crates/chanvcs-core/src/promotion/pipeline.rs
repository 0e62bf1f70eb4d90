//! Promotion pipeline.
//!
//! For each channel: load the target environment's variables in strict
//! mode, load the source artifact, reassemble it with target values bound,
//! run compatibility checks, consult the gate, then write the artifact into
//! the target tree. All written channels are committed once at the end.
//! One channel failing never stops the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chanvcs_state::ApprovalOutcome;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::gate::{GateDecision, PromotionGate};
use super::{ChannelPromotion, PromotionRequest, PromotionResult, PromotionState};
use crate::artifact::{self, assemble, layout, AssembleOptions, DecomposedArtifact};
use crate::batch::run_batch;
use crate::compat::{evaluate_compat, CompatRuleSet, PromoteContext};
use crate::config::EnvironmentConfig;
use crate::diff::diff_artifacts;
use crate::domain::error::{ChanvcsError, Result};
use crate::obs::{emit_promotion_transition, ChannelSpan};
use crate::sync::ChannelSync;
use crate::vars::VariableResolver;

/// Everything a single channel's promotion needs.
struct RunContext<'a> {
    promotion_id: String,
    request: &'a PromotionRequest,
    source_tree: String,
    target_tree: String,
    target: EnvironmentConfig,
    resolver: VariableResolver,
}

/// Source artifact that passed validation.
struct Candidate {
    templated: DecomposedArtifact,
    resolved: DecomposedArtifact,
}

/// Runs promotions and remembers their results.
pub struct PromotionPipeline {
    sync: Arc<ChannelSync>,
    gate: PromotionGate,
    rules: CompatRuleSet,
    runs: Mutex<HashMap<Uuid, PromotionResult>>,
}

impl PromotionPipeline {
    pub fn new(sync: Arc<ChannelSync>, gate: PromotionGate) -> Self {
        Self {
            sync,
            gate,
            rules: CompatRuleSet::standard(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_rules(mut self, rules: CompatRuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn gate(&self) -> &PromotionGate {
        &self.gate
    }

    /// Result of a promotion run by this pipeline.
    pub fn promotion_status(&self, id: Uuid) -> Result<PromotionResult> {
        self.runs
            .lock()
            .map_err(|_| ChanvcsError::Engine("promotion registry poisoned".to_string()))?
            .get(&id)
            .cloned()
            .ok_or_else(|| ChanvcsError::PromotionNotFound(id.to_string()))
    }

    fn remember(&self, result: &PromotionResult) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(result.promotion_id, result.clone());
        }
    }

    /// Promote `request.channel_ids` (or every source channel) from
    /// `request.source_env` into `request.target_env`.
    ///
    /// Path rules, unknown environments and an uninitialized store fail the
    /// whole promotion. Everything else is reported per channel.
    #[instrument(skip(self, request), fields(source = %request.source_env, target = %request.target_env, dry_run = request.dry_run))]
    pub async fn promote(&self, request: &PromotionRequest) -> Result<PromotionResult> {
        let config = self.sync.config();
        self.gate.check_path(&request.source_env, &request.target_env)?;
        if !request.dry_run {
            self.sync.ensure_initialized().await?;
        }

        let promotion_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ids = if request.channel_ids.is_empty() {
            self.sync.stored_channel_ids(&request.source_env).await?
        } else {
            request.channel_ids.clone()
        };

        let ctx = RunContext {
            promotion_id: promotion_id.to_string(),
            request,
            source_tree: config.tree_for(&request.source_env)?,
            target_tree: config.tree_for(&request.target_env)?,
            target: config.environment(&request.target_env)?,
            resolver: self.sync.resolver_for(&request.target_env, true).await?,
        };

        let report = run_batch("promote", ids, config.batch.max_concurrency, |id| {
            let ctx = &ctx;
            async move { Ok::<_, ChanvcsError>(self.promote_channel(ctx, &id).await) }
        })
        .await;
        let mut channels: Vec<ChannelPromotion> =
            report.items.into_iter().filter_map(|i| i.value).collect();

        let mut warnings = Vec::new();
        let mut commit = None;
        let mut pushed = false;
        let written: Vec<String> = channels
            .iter()
            .filter(|c| c.state == PromotionState::Approved)
            .map(|c| c.channel_id.clone())
            .collect();

        if !written.is_empty() {
            let committed = self.commit(&ctx, &written).await;
            let outcome_error = match committed {
                Ok((id, did_push)) => {
                    if id.is_none() {
                        warnings.push("target tree already up to date, nothing committed".to_string());
                    }
                    commit = id;
                    pushed = did_push;
                    None
                }
                Err(err) => {
                    warn!(error = %err, "promotion commit failed");
                    warnings.push(format!("commit failed: {err}"));
                    Some(err)
                }
            };
            for channel in channels
                .iter_mut()
                .filter(|c| c.state == PromotionState::Approved)
            {
                let (outcome, note) = match &outcome_error {
                    None => match Self::advance(&ctx, channel, PromotionState::Applied) {
                        Ok(()) => (ApprovalOutcome::Applied, None),
                        Err(err) => {
                            Self::fail(&ctx, channel, &err);
                            (ApprovalOutcome::Failed, Some(err.to_string()))
                        }
                    },
                    Some(err) => {
                        Self::fail(&ctx, channel, err);
                        (ApprovalOutcome::Failed, Some(err.to_string()))
                    }
                };
                self.record(request, channel, outcome, note).await;
            }
        }

        let result = PromotionResult {
            promotion_id,
            source_env: request.source_env.clone(),
            target_env: request.target_env.clone(),
            started_at,
            success: channels.iter().all(ChannelPromotion::succeeded),
            dry_run: request.dry_run,
            channels,
            warnings,
            commit,
            pushed,
        };
        info!(
            promotion_id = %promotion_id,
            success = result.success,
            applied = result.count(PromotionState::Applied),
            failed = result.count(PromotionState::Failed),
            rejected = result.count(PromotionState::Rejected),
            "promotion finished"
        );
        self.remember(&result);
        Ok(result)
    }

    async fn commit(
        &self,
        ctx: &RunContext<'_>,
        applied: &[String],
    ) -> Result<(Option<String>, bool)> {
        let request = ctx.request;
        let paths: Vec<String> = applied
            .iter()
            .map(|id| layout::channel_dir(&ctx.target_tree, id))
            .collect();
        let message = request.message.clone().unwrap_or_else(|| {
            format!(
                "promote {} channel(s) {} -> {}: {}",
                applied.len(),
                request.source_env,
                request.target_env,
                applied.join(", ")
            )
        });
        let commit = self.sync.vcs().commit(&message, &paths).await?;
        let mut pushed = false;
        if request.push && commit.is_some() {
            self.sync.vcs().push().await?;
            pushed = true;
        }
        Ok((commit.map(|c| c.to_string()), pushed))
    }

    fn advance(ctx: &RunContext<'_>, channel: &mut ChannelPromotion, next: PromotionState) -> Result<()> {
        let from = channel.state;
        channel.transition(next)?;
        emit_promotion_transition(&ctx.promotion_id, &channel.channel_id, from.as_str(), next.as_str());
        Ok(())
    }

    /// Mark the channel failed from any state that allows it.
    fn fail(ctx: &RunContext<'_>, channel: &mut ChannelPromotion, err: &ChanvcsError) {
        channel.error = Some(err.to_string());
        if Self::advance(ctx, channel, PromotionState::Failed).is_err() {
            warn!(channel_id = %channel.channel_id, state = %channel.state, "cannot mark channel failed");
        }
    }

    /// Mark the channel rejected by the gate.
    fn reject(ctx: &RunContext<'_>, channel: &mut ChannelPromotion, reason: String) {
        channel.error = Some(reason);
        if let Err(err) = Self::advance(ctx, channel, PromotionState::Rejected) {
            warn!(channel_id = %channel.channel_id, state = %channel.state, error = %err, "cannot mark channel rejected");
        }
    }

    async fn promote_channel(&self, ctx: &RunContext<'_>, id: &str) -> ChannelPromotion {
        let mut channel = ChannelPromotion::new(id);

        let candidate = match self.validate(ctx, id, &mut channel).await {
            Ok(candidate) => candidate,
            Err(err) => {
                Self::fail(ctx, &mut channel, &err);
                return channel;
            }
        };
        if let Err(err) = Self::advance(ctx, &mut channel, PromotionState::Validated) {
            Self::fail(ctx, &mut channel, &err);
            return channel;
        }
        if ctx.request.dry_run {
            return channel;
        }

        let request = ctx.request;
        let decision = match self
            .gate
            .evaluate(&request.source_env, &request.target_env, id, request.force)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                Self::reject(ctx, &mut channel, err.to_string());
                return channel;
            }
        };
        if let GateDecision::Rejected { reason } = &decision {
            let reason = ChanvcsError::PromotionGateRejected(reason.clone()).to_string();
            Self::reject(ctx, &mut channel, reason);
            return channel;
        }
        if let Err(err) = Self::advance(ctx, &mut channel, PromotionState::Approved) {
            Self::fail(ctx, &mut channel, &err);
            return channel;
        }

        let artifact = if request.materialize {
            &candidate.resolved
        } else {
            &candidate.templated
        };
        if let Err(err) =
            artifact::write_artifact(self.sync.store(), &ctx.target_tree, artifact).await
        {
            Self::fail(ctx, &mut channel, &err);
            let note = Some(err.to_string());
            self.record(request, &mut channel, ApprovalOutcome::Failed, note)
                .await;
        }
        channel
    }

    /// Append the channel's outcome to the approval log. A log failure is a
    /// warning on the channel, not a promotion failure.
    async fn record(
        &self,
        request: &PromotionRequest,
        channel: &mut ChannelPromotion,
        outcome: ApprovalOutcome,
        note: Option<String>,
    ) {
        if let Err(err) = self
            .gate
            .record_outcome(request, &channel.channel_id, outcome, note)
            .await
        {
            warn!(channel_id = %channel.channel_id, error = %err, "could not record promotion outcome");
            channel.warnings.push(format!("approval log not updated: {err}"));
        }
    }

    /// Strict resolution, reassembly and compat checks. Fills in warnings
    /// and the planned changes against the target.
    async fn validate(
        &self,
        ctx: &RunContext<'_>,
        id: &str,
        channel: &mut ChannelPromotion,
    ) -> Result<Candidate> {
        let store = self.sync.store();
        let templated = artifact::read_artifact(store, &ctx.source_tree, id)
            .await?
            .ok_or_else(|| ChanvcsError::ChannelNotFound {
                id: id.to_string(),
                location: format!("tree '{}'", ctx.source_tree),
            })?;
        let existing = artifact::read_artifact(store, &ctx.target_tree, id).await?;

        let _span = ChannelSpan::enter("promote", id);
        let mut resolved = templated.clone();
        resolved.resolve_properties(&ctx.resolver)?;
        assemble(&resolved, &AssembleOptions::default())?;

        let verdict = evaluate_compat(
            &self.rules,
            &PromoteContext {
                artifact: &resolved,
                target: &ctx.target,
            },
        );
        channel
            .warnings
            .extend(verdict.warnings().map(|v| format!("{}: {}", v.location, v.reason)));
        if !verdict.passed() {
            let reasons: Vec<String> = verdict
                .errors()
                .map(|v| format!("{}: {}", v.location, v.reason))
                .collect();
            return Err(ChanvcsError::PromotionGateRejected(format!(
                "incompatible with {}: {}",
                ctx.request.target_env,
                reasons.join("; ")
            )));
        }

        let planned = if ctx.request.materialize {
            &resolved
        } else {
            &templated
        };
        channel.changes = existing.map(|current| diff_artifacts(&current, planned));
        Ok(Candidate {
            templated,
            resolved,
        })
    }
}
