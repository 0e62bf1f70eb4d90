//! chanvcs - channel configuration version control CLI
//!
//! The `chanvcs` command keeps integration-channel configurations in a git
//! working tree, one tree per environment.
//!
//! ## Commands
//!
//! - `export`: pull live channels into an environment tree and commit
//! - `import`: assemble stored channels with environment variables bound
//! - `diff`: compare a live channel with its stored copy
//! - `delta`: channels changed between two revisions, optionally deployed
//! - `promote`: approval-gated copy of channels between environments
//! - `approve` / `reject` / `history`: the promotion approval log

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

use chanvcs_core::{
    BatchReport, ChangeKind, ChannelDiff, ChannelSync, ChanvcsConfig, DirectoryEngine,
    ExportOptions, ExportReport, ImportOptions, ImportOutcome, PromotionGate, PromotionPipeline,
    PromotionRequest, PromotionResult, StepOrder,
};
use chanvcs_state::{ApprovalLog, FsFileStore, GitVersionControl, JsonlApprovalLog};

#[derive(Parser)]
#[command(name = "chanvcs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Version control for integration channel configurations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: $CHANVCS_CONFIG or ./chanvcs.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository working tree
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Directory of live `<id>.xml` channel documents
    #[arg(long, global = true)]
    engine_dir: Option<PathBuf>,

    /// Git remote used by `--push`
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Command output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Export live channels into an environment tree
    Export {
        /// Environment to export into
        #[arg(short, long)]
        env: String,

        /// Export a single channel (default: every live channel)
        #[arg(short, long)]
        channel: Option<String>,

        /// Write files without committing
        #[arg(long)]
        no_commit: bool,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Push after committing
        #[arg(long)]
        push: bool,
    },

    /// Assemble stored channels for an environment
    Import {
        #[arg(short, long)]
        env: String,

        /// Channel ids (default: every stored channel)
        channels: Vec<String>,

        /// Send assembled documents to the engine
        #[arg(long)]
        apply: bool,

        /// Fail on any unresolved variable
        #[arg(long)]
        strict: bool,

        /// Regroup transformer steps by kind
        #[arg(long)]
        group_steps: bool,
    },

    /// Compare a live channel with the stored copy
    Diff {
        #[arg(short, long)]
        env: String,

        /// Channel id
        channel: String,

        /// Compare this document instead of the engine's live one
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Flag plaintext credentials in a channel document
    Secrets {
        /// Channel document (XML)
        file: PathBuf,
    },

    /// Show channel references for an environment
    Graph {
        #[arg(short, long)]
        env: String,

        /// Show channels that depend on this one
        #[arg(long)]
        dependents_of: Option<String>,
    },

    /// Channels changed between two revisions
    Delta {
        #[arg(short, long)]
        env: String,

        /// Base revision
        #[arg(default_value = "HEAD~1")]
        from: String,

        /// Target revision
        #[arg(default_value = "HEAD")]
        to: String,

        /// Import and apply the changed channels
        #[arg(long)]
        deploy: bool,
    },

    /// Promote channels from one environment to another
    Promote {
        source: String,
        target: String,

        /// Channel ids (default: every channel in the source tree)
        channels: Vec<String>,

        /// Validate and report without writing
        #[arg(long)]
        dry_run: bool,

        /// Bypass the approval check (recorded in the approval log)
        #[arg(long)]
        force: bool,

        /// Push after committing
        #[arg(long)]
        push: bool,

        /// Write resolved values instead of the templated artifact
        #[arg(long)]
        materialize: bool,

        /// Who requested the promotion
        #[arg(long, env = "USER")]
        by: Option<String>,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Approve channels for promotion
    Approve {
        source: String,
        target: String,
        #[arg(required = true)]
        channels: Vec<String>,
        #[arg(long, env = "USER")]
        by: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject channels for promotion
    Reject {
        source: String,
        target: String,
        #[arg(required = true)]
        channels: Vec<String>,
        #[arg(long, env = "USER")]
        by: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Show the approval log for a promotion path, newest first
    History {
        source: String,
        target: String,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the variables an environment resolves
    Vars {
        #[arg(short, long)]
        env: String,

        /// Resolve this text instead of listing variables
        #[arg(long)]
        resolve: Option<String>,
    },
}

/// Services wired over one working tree.
struct App {
    sync: Arc<ChannelSync>,
    pipeline: PromotionPipeline,
    approvals: Arc<JsonlApprovalLog>,
    format: OutputFormat,
}

impl App {
    fn build(cli: &Cli, config: ChanvcsConfig) -> Self {
        let repo = cli.repo.clone();
        let engine_dir = resolve_engine_dir(&repo, cli.engine_dir.as_deref(), &config);
        let approvals_path = repo.join(&config.approvals.path);

        let store = Arc::new(FsFileStore::new(&repo));
        let mut vcs = GitVersionControl::new(&repo);
        if let Some(remote) = &cli.remote {
            vcs = vcs.with_remote(remote.clone());
        }
        let engine = Arc::new(DirectoryEngine::new(engine_dir));
        let sync = Arc::new(ChannelSync::new(store, Arc::new(vcs), engine, config.clone()));
        let approvals = Arc::new(JsonlApprovalLog::new(approvals_path));
        let gate = PromotionGate::new(approvals.clone(), config);

        Self {
            pipeline: PromotionPipeline::new(sync.clone(), gate),
            sync,
            approvals,
            format: cli.format,
        }
    }

    /// Print `value` as JSON, or run `text` for the human form.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(value),
        }
        Ok(())
    }
}

/// `--engine-dir`, then `[engine] directory`, then `.chanvcs/engine`.
/// Relative paths are taken from the repository root.
fn resolve_engine_dir(repo: &Path, flag: Option<&Path>, config: &ChanvcsConfig) -> PathBuf {
    match flag {
        Some(dir) => dir.to_path_buf(),
        None => match &config.engine.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo.join(dir),
            None => repo.join(".chanvcs/engine"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    chanvcs_core::init_tracing(cli.json, level);

    let config = ChanvcsConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let app = App::build(&cli, config);
    info!(repo = %cli.repo.display(), "chanvcs {}", chanvcs_core::VERSION);

    match cli.command {
        Commands::Export {
            env,
            channel,
            no_commit,
            message,
            push,
        } => {
            let opts = ExportOptions {
                commit: !no_commit,
                message,
                push,
            };
            cmd_export(&app, &env, channel.as_deref(), &opts).await
        }
        Commands::Import {
            env,
            channels,
            apply,
            strict,
            group_steps,
        } => {
            let opts = ImportOptions {
                apply,
                strict: strict.then_some(true),
                step_order: if group_steps {
                    StepOrder::GroupByKind
                } else {
                    StepOrder::Sequence
                },
            };
            cmd_import(&app, &env, channels, &opts).await
        }
        Commands::Diff { env, channel, file } => {
            cmd_diff(&app, &env, &channel, file.as_deref()).await
        }
        Commands::Secrets { file } => cmd_secrets(&app, &file),
        Commands::Graph { env, dependents_of } => {
            cmd_graph(&app, &env, dependents_of.as_deref()).await
        }
        Commands::Delta {
            env,
            from,
            to,
            deploy,
        } => cmd_delta(&app, &env, &from, &to, deploy).await,
        Commands::Promote {
            source,
            target,
            channels,
            dry_run,
            force,
            push,
            materialize,
            by,
            message,
        } => {
            let request = PromotionRequest {
                channel_ids: channels,
                requested_by: by,
                dry_run,
                force,
                push,
                materialize,
                message,
                ..PromotionRequest::new(source, target)
            };
            cmd_promote(&app, &request).await
        }
        Commands::Approve {
            source,
            target,
            channels,
            by,
            note,
        } => cmd_decide(&app, &source, &target, channels, by, true, note).await,
        Commands::Reject {
            source,
            target,
            channels,
            by,
            note,
        } => cmd_decide(&app, &source, &target, channels, by, false, note).await,
        Commands::History {
            source,
            target,
            limit,
        } => cmd_history(&app, &source, &target, limit).await,
        Commands::Vars { env, resolve } => cmd_vars(&app, &env, resolve.as_deref()).await,
    }
}

// ========== Export / Import ==========

async fn cmd_export(
    app: &App,
    env: &str,
    channel: Option<&str>,
    opts: &ExportOptions,
) -> Result<()> {
    let report = match channel {
        Some(id) => app.sync.export_channel(env, id, opts).await,
        None => app.sync.export_all(env, opts).await,
    }
    .with_context(|| format!("export into '{env}' failed"))?;

    app.emit(&report, |r| print!("{}", render_export(r)))?;
    report.channels.ensure_success()?;
    Ok(())
}

fn render_export(report: &ExportReport) -> String {
    let mut out = String::new();
    for item in &report.channels.items {
        match (&item.value, &item.error) {
            (Some(outcome), _) => {
                out.push_str(&format!("exported {} ({} files", item.id, outcome.files.len()));
                if !outcome.masked.is_empty() {
                    out.push_str(&format!(", {} secrets masked", outcome.masked.len()));
                }
                out.push_str(")\n");
            }
            (None, Some(err)) => out.push_str(&format!("failed   {}: {}\n", item.id, err)),
            (None, None) => {}
        }
    }
    match &report.commit {
        Some(commit) => out.push_str(&format!(
            "committed {}{}\n",
            commit.short(),
            if report.pushed { " (pushed)" } else { "" }
        )),
        None => out.push_str("nothing committed\n"),
    }
    out
}

async fn cmd_import(
    app: &App,
    env: &str,
    channels: Vec<String>,
    opts: &ImportOptions,
) -> Result<()> {
    let report = app
        .sync
        .import_all(env, channels, opts)
        .await
        .with_context(|| format!("import from '{env}' failed"))?;
    app.emit(&report, |r| print!("{}", render_imports(r)))?;
    report.ensure_success()?;
    Ok(())
}

fn render_imports(report: &BatchReport<ImportOutcome>) -> String {
    let mut out = String::new();
    for item in &report.items {
        match (&item.value, &item.error) {
            (Some(outcome), _) => {
                let verb = if outcome.applied { "applied " } else { "assembled" };
                out.push_str(&format!("{verb} {}", item.id));
                if !outcome.unresolved.is_empty() {
                    out.push_str(&format!(" (unresolved: {})", outcome.unresolved.join(", ")));
                }
                out.push('\n');
            }
            (None, Some(err)) => out.push_str(&format!("failed    {}: {}\n", item.id, err)),
            (None, None) => {}
        }
    }
    out
}

// ========== Diff / Secrets / Graph ==========

async fn cmd_diff(app: &App, env: &str, channel: &str, file: Option<&Path>) -> Result<()> {
    let diff = match file {
        Some(path) => {
            let doc = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            app.sync.diff_channel(env, channel, &doc).await?
        }
        None => app.sync.diff_live(env, channel).await?,
    };
    app.emit(&diff, |d| print!("{}", render_diff(d)))
}

fn render_diff(diff: &ChannelDiff) -> String {
    if diff.identical {
        return format!("{}: identical\n", diff.channel_id);
    }
    let mut out = format!(
        "{}: {} added, {} removed, {} modified\n",
        diff.channel_id,
        diff.count(ChangeKind::Added),
        diff.count(ChangeKind::Removed),
        diff.count(ChangeKind::Modified)
    );
    for change in &diff.changes {
        let line = match change.kind {
            ChangeKind::Added => format!(
                "  + {} = {}\n",
                change.path,
                truncate(change.after.as_deref().unwrap_or_default(), 60)
            ),
            ChangeKind::Removed => format!(
                "  - {} = {}\n",
                change.path,
                truncate(change.before.as_deref().unwrap_or_default(), 60)
            ),
            ChangeKind::Modified => format!(
                "  ~ {}: {} -> {}\n",
                change.path,
                truncate(change.before.as_deref().unwrap_or_default(), 40),
                truncate(change.after.as_deref().unwrap_or_default(), 40)
            ),
        };
        out.push_str(&line);
    }
    out
}

fn truncate(s: &str, max_len: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() <= max_len && line.len() == s.len() {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn cmd_secrets(app: &App, file: &Path) -> Result<()> {
    let doc = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let findings = app.sync.detect_secrets(&doc)?;
    app.emit(&findings, |findings| {
        if findings.is_empty() {
            println!("no plaintext credentials found");
        }
        for f in findings {
            println!("{} -> ${{{}}}", f.path, f.variable);
        }
    })
}

async fn cmd_graph(app: &App, env: &str, dependents_of: Option<&str>) -> Result<()> {
    let graph = app.sync.dependency_graph(env).await?;
    if let Some(id) = dependents_of {
        let dependents = graph.transitive_dependents_of(id)?;
        return app.emit(&dependents, |ids| {
            for dep in ids {
                println!("{dep}");
            }
        });
    }

    let summary = graph.summary();
    app.emit(&summary, |s| {
        for (from, to) in &s.edges {
            println!("{from} -> {to}");
        }
        for d in &s.dangling {
            println!("{} -> {} (missing)", d.from, d.to);
        }
        for cycle in &s.cycles {
            println!("cycle: {}", cycle.join(" -> "));
        }
        if let Some(order) = &s.order {
            println!("order: {}", order.join(", "));
        }
    })
}

// ========== Delta ==========

async fn cmd_delta(app: &App, env: &str, from: &str, to: &str, deploy: bool) -> Result<()> {
    if deploy {
        let report = app.sync.deploy_delta(env, from, to).await?;
        app.emit(&report, |r| {
            if r.delta.is_empty() {
                println!("no changes between {from} and {to}");
            }
            for id in r.delta.removed_ids() {
                println!("removed   {id} (not deployed)");
            }
            print!("{}", render_imports(&r.imports));
            for warning in &r.warnings {
                println!("warning: {warning}");
            }
        })?;
        return Ok(report.imports.ensure_success()?);
    }

    let delta = app.sync.detect_delta(env, from, to).await?;
    app.emit(&delta, |d| {
        if d.is_empty() {
            println!("no changes between {from} and {to}");
        }
        for channel in &d.channels {
            let marker = if channel.removed { "removed" } else { "changed" };
            println!("{marker} {} ({} files)", channel.id, channel.paths.len());
        }
        if d.environment_changed {
            println!("environment files changed: {}", d.environment_files.join(", "));
        }
    })
}

// ========== Promotion ==========

async fn cmd_promote(app: &App, request: &PromotionRequest) -> Result<()> {
    let result = app.pipeline.promote(request).await.with_context(|| {
        format!(
            "promotion {} -> {} failed",
            request.source_env, request.target_env
        )
    })?;
    app.emit(&result, |r| print!("{}", render_promotion(r)))?;
    if !result.success {
        bail!("promotion {} did not complete", result.promotion_id);
    }
    Ok(())
}

fn render_promotion(result: &PromotionResult) -> String {
    let mut out = format!(
        "promotion {} {} -> {}{}\n",
        result.promotion_id,
        result.source_env,
        result.target_env,
        if result.dry_run { " (dry run)" } else { "" }
    );
    for channel in &result.channels {
        out.push_str(&format!("  {:<9} {}", channel.state.as_str(), channel.channel_id));
        if let Some(changes) = &channel.changes {
            if changes.identical {
                out.push_str(" (unchanged)");
            } else {
                out.push_str(&format!(" ({} changes)", changes.changes.len()));
            }
        } else if !matches!(
            channel.state,
            chanvcs_core::PromotionState::Failed | chanvcs_core::PromotionState::Rejected
        ) {
            out.push_str(" (new)");
        }
        out.push('\n');
        if let Some(err) = &channel.error {
            out.push_str(&format!("            {err}\n"));
        }
        for warning in &channel.warnings {
            out.push_str(&format!("            warning: {warning}\n"));
        }
    }
    for warning in &result.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    if let Some(commit) = &result.commit {
        out.push_str(&format!(
            "committed {}{}\n",
            commit.chars().take(8).collect::<String>(),
            if result.pushed { " (pushed)" } else { "" }
        ));
    }
    out
}

async fn cmd_decide(
    app: &App,
    source: &str,
    target: &str,
    channels: Vec<String>,
    by: Option<String>,
    approved: bool,
    note: Option<String>,
) -> Result<()> {
    let record = app
        .pipeline
        .gate()
        .decide(source, target, channels, by, approved, note)
        .await?;
    app.emit(&record, |r| {
        println!(
            "{} {} for {} -> {}",
            if approved { "approved" } else { "rejected" },
            r.channel_ids.join(", "),
            r.source_env,
            r.target_env
        )
    })
}

async fn cmd_history(app: &App, source: &str, target: &str, limit: usize) -> Result<()> {
    let mut history = app.approvals.history(source, target).await?;
    history.truncate(limit);
    app.emit(&history, |records| {
        if records.is_empty() {
            println!("No approval history for {source} -> {target}");
        }
        for r in records {
            println!(
                "{} {:<8} {} by {}{}",
                r.timestamp.to_rfc3339(),
                format!("{:?}", r.outcome).to_lowercase(),
                r.channel_ids.join(","),
                r.approved_by.as_deref().unwrap_or("-"),
                if r.forced { " (forced)" } else { "" }
            );
        }
    })
}

// ========== Variables ==========

async fn cmd_vars(app: &App, env: &str, resolve: Option<&str>) -> Result<()> {
    let resolver = app.sync.resolver_for(env, false).await?;
    if let Some(text) = resolve {
        let resolved = resolver.resolve(text)?;
        #[derive(Serialize)]
        struct Out<'a> {
            value: &'a str,
            unresolved: &'a [String],
        }
        let out = Out {
            value: &resolved.value,
            unresolved: &resolved.unresolved,
        };
        return app.emit(&out, |o| {
            println!("{}", o.value);
            if !o.unresolved.is_empty() {
                eprintln!("unresolved: {}", o.unresolved.join(", "));
            }
        });
    }

    let vars: Vec<_> = resolver.variable_map().into_values().collect();
    app.emit(&vars, |vars| {
        for v in vars {
            println!("{}={} ({:?})", v.name, v.value, v.source);
        }
    })
}
