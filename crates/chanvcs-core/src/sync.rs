//! Export, import, diff and delta operations over one repository.
//!
//! [`ChannelSync`] wires the working tree, version control and the routing
//! engine together. Every environment maps to a tree inside the repository
//! (see [`ChanvcsConfig::tree_for`]).

use std::sync::Arc;

use chanvcs_state::{CommitId, FileStore, VersionControl};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::artifact::{
    self, assemble_to_string, decompose_str, layout, AssembleOptions, DecomposedArtifact,
    StepOrder,
};
use crate::batch::{run_batch, BatchItemResult, BatchReport};
use crate::config::ChanvcsConfig;
use crate::delta::{compute_delta, DeltaReport};
use crate::diff::graph::ChannelGraph;
use crate::diff::secrets::{self, SecretFinding};
use crate::diff::{diff_artifacts, ChannelDiff};
use crate::domain::error::{ChanvcsError, Result};
use crate::engine::ChannelEngine;
use crate::obs::{emit_delta_detected, emit_export_finished, emit_import_finished};
use crate::vars::{ProcessEnvironment, VariableResolver};

/// How an export is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Commit the written files.
    pub commit: bool,
    /// Commit message; a default naming the channels is used otherwise.
    pub message: Option<String>,
    /// Push after committing.
    pub push: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            commit: true,
            message: None,
            push: false,
        }
    }
}

/// How an import is performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Send the assembled document to the engine.
    pub apply: bool,
    /// Override `[resolver] strict_import`.
    pub strict: Option<bool>,
    pub step_order: StepOrder,
}

/// One exported channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub channel_id: String,
    pub files: Vec<String>,
    /// Values replaced with variable tokens.
    pub masked: Vec<SecretFinding>,
}

/// Result of exporting one or more channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub environment: String,
    pub channels: BatchReport<ExportOutcome>,
    pub commit: Option<CommitId>,
    pub pushed: bool,
}

/// One imported channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub channel_id: String,
    /// Assembled channel document with variables resolved.
    pub document: String,
    pub unresolved: Vec<String>,
    pub applied: bool,
}

/// Result of deploying the channels changed between two revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaDeployReport {
    pub delta: DeltaReport,
    pub imports: BatchReport<ImportOutcome>,
    /// Changes the deploy did not act on.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Repository-level operations.
pub struct ChannelSync {
    store: Arc<dyn FileStore>,
    vcs: Arc<dyn VersionControl>,
    engine: Arc<dyn ChannelEngine>,
    config: ChanvcsConfig,
    process: Arc<ProcessEnvironment>,
}

impl ChannelSync {
    /// Captures the process environment according to `[resolver]`.
    pub fn new(
        store: Arc<dyn FileStore>,
        vcs: Arc<dyn VersionControl>,
        engine: Arc<dyn ChannelEngine>,
        config: ChanvcsConfig,
    ) -> Self {
        let process = ProcessEnvironment::capture(config.resolver.process_prefix.as_deref());
        Self {
            store,
            vcs,
            engine,
            config,
            process: Arc::new(process),
        }
    }

    /// Replace the captured process overrides.
    pub fn with_process_environment(mut self, process: ProcessEnvironment) -> Self {
        self.process = Arc::new(process);
        self
    }

    pub fn config(&self) -> &ChanvcsConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn FileStore {
        self.store.as_ref()
    }

    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    pub fn engine(&self) -> &dyn ChannelEngine {
        self.engine.as_ref()
    }

    /// `StoreNotInitialized` unless the working tree is under version
    /// control.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.vcs.is_initialized().await? {
            Ok(())
        } else {
            Err(ChanvcsError::StoreNotInitialized(
                "working tree is not under version control".to_string(),
            ))
        }
    }

    /// Resolver loaded with `env`'s defaults and environment files.
    pub async fn resolver_for(&self, env: &str, strict: bool) -> Result<VariableResolver> {
        let tree = self.config.tree_for(env)?;
        let mut resolver = VariableResolver::new(self.process.clone()).strict(strict);
        resolver
            .load_environment(self.store.as_ref(), &tree, Some(env))
            .await?;
        Ok(resolver)
    }

    /// Stored artifact of `id` in `env`, or `ChannelNotFound`.
    pub async fn load_artifact(&self, env: &str, id: &str) -> Result<DecomposedArtifact> {
        let tree = self.config.tree_for(env)?;
        artifact::read_artifact(self.store.as_ref(), &tree, id)
            .await?
            .ok_or_else(|| ChanvcsError::ChannelNotFound {
                id: id.to_string(),
                location: format!("tree '{tree}'"),
            })
    }

    /// Ids stored in `env`'s tree.
    pub async fn stored_channel_ids(&self, env: &str) -> Result<Vec<String>> {
        let tree = self.config.tree_for(env)?;
        artifact::list_channel_ids(self.store.as_ref(), &tree).await
    }

    async fn fetch_live(&self, id: &str) -> Result<String> {
        self.engine
            .fetch_channel(id)
            .await?
            .ok_or_else(|| ChanvcsError::ChannelNotFound {
                id: id.to_string(),
                location: "engine".to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    #[instrument(skip(self, tree), fields(environment = %env, channel_id = %id))]
    async fn export_one(&self, env: &str, tree: &str, id: &str) -> Result<ExportOutcome> {
        let live = self.fetch_live(id).await?;
        let mut artifact = decompose_str(&live)?;
        if artifact.id() != id {
            return Err(ChanvcsError::MalformedArtifact(format!(
                "engine returned channel '{}' for id '{id}'",
                artifact.id()
            )));
        }
        let masked = if self.config.export.mask_secrets {
            secrets::mask_secrets(&mut artifact)
        } else {
            Vec::new()
        };
        let files = artifact::write_artifact(self.store.as_ref(), tree, &artifact).await?;
        emit_export_finished(env, id, files.len(), masked.len());
        Ok(ExportOutcome {
            channel_id: id.to_string(),
            files,
            masked,
        })
    }

    /// Commit the directories of `ids` once and push on request.
    async fn record_export(
        &self,
        env: &str,
        tree: &str,
        ids: &[&str],
        opts: &ExportOptions,
    ) -> Result<(Option<CommitId>, bool)> {
        if !opts.commit || ids.is_empty() {
            return Ok((None, false));
        }
        let paths: Vec<String> = ids.iter().map(|id| layout::channel_dir(tree, id)).collect();
        let message = opts.message.clone().unwrap_or_else(|| {
            format!("export {} channel(s) from {env}: {}", ids.len(), ids.join(", "))
        });
        let commit = self.vcs.commit(&message, &paths).await?;
        let mut pushed = false;
        if opts.push && commit.is_some() {
            self.vcs.push().await?;
            pushed = true;
        }
        Ok((commit, pushed))
    }

    /// Export one live channel into `env`'s tree.
    #[instrument(skip(self, opts), fields(environment = %env, channel_id = %id))]
    pub async fn export_channel(
        &self,
        env: &str,
        id: &str,
        opts: &ExportOptions,
    ) -> Result<ExportReport> {
        if opts.commit {
            self.ensure_initialized().await?;
        }
        let tree = self.config.tree_for(env)?;
        let outcome = self.export_one(env, &tree, id).await?;
        let (commit, pushed) = self.record_export(env, &tree, &[id], opts).await?;
        Ok(ExportReport {
            environment: env.to_string(),
            channels: BatchReport {
                items: vec![BatchItemResult {
                    id: id.to_string(),
                    value: Some(outcome),
                    error: None,
                }],
            },
            commit,
            pushed,
        })
    }

    /// Export every live channel. Failed channels are reported, not fatal.
    #[instrument(skip(self, opts), fields(environment = %env))]
    pub async fn export_all(&self, env: &str, opts: &ExportOptions) -> Result<ExportReport> {
        if opts.commit {
            self.ensure_initialized().await?;
        }
        let tree = self.config.tree_for(env)?;
        let ids = self.engine.list_channel_ids().await?;
        let channels = run_batch("export", ids, self.config.batch.max_concurrency, |id| {
            let tree = tree.as_str();
            async move { self.export_one(env, tree, &id).await }
        })
        .await;

        let exported: Vec<&str> = channels.values().map(|(id, _)| id).collect();
        let (commit, pushed) = self.record_export(env, &tree, &exported, opts).await?;
        info!(
            environment = %env,
            exported = exported.len(),
            failed = channels.failed(),
            commit = ?commit.as_ref().map(CommitId::short),
            "export complete"
        );
        Ok(ExportReport {
            environment: env.to_string(),
            channels,
            commit,
            pushed,
        })
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    #[instrument(skip(self, resolver, opts), fields(environment = %env, channel_id = %id))]
    async fn import_one(
        &self,
        env: &str,
        resolver: &VariableResolver,
        id: &str,
        opts: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let mut artifact = self.load_artifact(env, id).await?;
        let unresolved = artifact.resolve_properties(resolver)?;
        let document = assemble_to_string(
            &artifact,
            &AssembleOptions::default().with_step_order(opts.step_order),
        )?;
        if opts.apply {
            self.engine.apply_channel(id, &document).await?;
        }
        emit_import_finished(env, id, unresolved.len(), opts.apply);
        Ok(ImportOutcome {
            channel_id: id.to_string(),
            document,
            unresolved,
            applied: opts.apply,
        })
    }

    fn strict_import(&self, opts: &ImportOptions) -> bool {
        opts.strict.unwrap_or(self.config.resolver.strict_import)
    }

    /// Assemble a stored channel for `env`, optionally applying it.
    #[instrument(skip(self, opts), fields(environment = %env, channel_id = %id))]
    pub async fn import_channel(
        &self,
        env: &str,
        id: &str,
        opts: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let resolver = self.resolver_for(env, self.strict_import(opts)).await?;
        self.import_one(env, &resolver, id, opts).await
    }

    /// Import `ids`, or every stored channel when `ids` is empty.
    #[instrument(skip(self, ids, opts), fields(environment = %env))]
    pub async fn import_all(
        &self,
        env: &str,
        ids: Vec<String>,
        opts: &ImportOptions,
    ) -> Result<BatchReport<ImportOutcome>> {
        let ids = if ids.is_empty() {
            self.stored_channel_ids(env).await?
        } else {
            ids
        };
        let resolver = self.resolver_for(env, self.strict_import(opts)).await?;
        let report = run_batch("import", ids, self.config.batch.max_concurrency, |id| {
            let resolver = &resolver;
            async move { self.import_one(env, resolver, &id, opts).await }
        })
        .await;
        info!(
            environment = %env,
            imported = report.total() - report.failed(),
            failed = report.failed(),
            "import complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Diff, secrets, graph
    // -----------------------------------------------------------------------

    /// Compare `live_doc` with the stored channel `id`, the stored side
    /// resolved with `env`'s variables.
    #[instrument(skip(self, live_doc), fields(environment = %env, channel_id = %id))]
    pub async fn diff_channel(&self, env: &str, id: &str, live_doc: &str) -> Result<ChannelDiff> {
        let live = decompose_str(live_doc)?;
        if live.id() != id {
            return Err(ChanvcsError::MalformedArtifact(format!(
                "document is channel '{}', expected '{id}'",
                live.id()
            )));
        }
        let mut stored = self.load_artifact(env, id).await?;
        let resolver = self.resolver_for(env, false).await?;
        stored.resolve_properties(&resolver)?;
        Ok(diff_artifacts(&stored, &live))
    }

    /// Diff the engine's live document of `id`.
    pub async fn diff_live(&self, env: &str, id: &str) -> Result<ChannelDiff> {
        let live = self.fetch_live(id).await?;
        self.diff_channel(env, id, &live).await
    }

    /// Flag credential-shaped values in a channel document.
    pub fn detect_secrets(&self, doc: &str) -> Result<Vec<SecretFinding>> {
        Ok(secrets::detect_secrets(&decompose_str(doc)?))
    }

    /// Reference graph over every channel stored in `env`.
    pub async fn dependency_graph(&self, env: &str) -> Result<ChannelGraph> {
        let mut artifacts = Vec::new();
        for id in self.stored_channel_ids(env).await? {
            artifacts.push(self.load_artifact(env, &id).await?);
        }
        Ok(ChannelGraph::build(&artifacts))
    }

    // -----------------------------------------------------------------------
    // Delta
    // -----------------------------------------------------------------------

    /// Channels of `env` that changed between revisions `from` and `to`.
    #[instrument(skip(self), fields(environment = %env))]
    pub async fn detect_delta(&self, env: &str, from: &str, to: &str) -> Result<DeltaReport> {
        self.ensure_initialized().await?;
        let tree = self.config.tree_for(env)?;
        let changes = self.vcs.changed_paths(from, to).await?;
        let report = compute_delta(env, &tree, from, to, &changes);
        emit_delta_detected(
            env,
            from,
            to,
            report.changed_ids().len(),
            report.removed_ids().len(),
        );
        Ok(report)
    }

    /// Import and apply only the changed, non-removed channels.
    pub async fn deploy_delta(&self, env: &str, from: &str, to: &str) -> Result<DeltaDeployReport> {
        let delta = self.detect_delta(env, from, to).await?;
        let ids = delta.changed_ids();
        let imports = if ids.is_empty() {
            BatchReport { items: Vec::new() }
        } else {
            let opts = ImportOptions {
                apply: true,
                ..ImportOptions::default()
            };
            self.import_all(env, ids, &opts).await?
        };

        let mut warnings = Vec::new();
        if delta.environment_changed {
            warn!(
                environment = %env,
                files = ?delta.environment_files,
                "variable files changed; unchanged channels were not redeployed"
            );
            warnings.push(format!(
                "variable files changed ({}); channels without artifact changes were not redeployed",
                delta.environment_files.join(", ")
            ));
        }
        Ok(DeltaDeployReport {
            delta,
            imports,
            warnings,
        })
    }
}
