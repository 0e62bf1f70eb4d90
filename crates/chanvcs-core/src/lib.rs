//! chanvcs core library
//!
//! Version control for integration-channel configurations: lossless
//! decompose/assemble of channel documents, layered `${VAR}` resolution,
//! structural diff, revision deltas, and approval-gated promotion between
//! environments.

pub mod artifact;
pub mod batch;
pub mod compat;
pub mod config;
pub mod delta;
pub mod diff;
pub mod domain;
pub mod engine;
pub mod obs;
pub mod promotion;
pub mod sync;
pub mod telemetry;
pub mod vars;
pub mod xml;

pub use artifact::{
    assemble, assemble_to_string, decompose, decompose_str, AssembleOptions, ChannelMetadata,
    ConnectorFiles, DecomposedArtifact, PropertyValue, Scripts, Step, StepOrder,
};
pub use batch::{run_batch, BatchItemResult, BatchReport};
pub use compat::{
    evaluate_compat, CompatRule, CompatRuleSet, CompatVerdict, CompatViolation, PromoteContext,
    Severity,
};
pub use config::{ChanvcsConfig, EnvironmentConfig, PromotionPath};
pub use delta::{compute_delta, ChannelDelta, DeltaReport};
pub use diff::graph::{ChannelGraph, GraphSummary};
pub use diff::secrets::{detect_secrets, mask_secrets, SecretFinding, SecretReason};
pub use diff::{diff_artifacts, Change, ChangeKind, ChannelDiff};
pub use domain::{ChanvcsError, Result};
pub use engine::{ChannelEngine, DirectoryEngine, MemoryChannelEngine};
pub use obs::{
    emit_batch_item_failed, emit_delta_detected, emit_export_finished, emit_import_finished,
    emit_promotion_transition, ChannelSpan,
};
pub use promotion::{
    ChannelPromotion, GateDecision, PromotionGate, PromotionPipeline, PromotionRequest,
    PromotionResult, PromotionState,
};
pub use sync::{
    ChannelSync, DeltaDeployReport, ExportOptions, ExportOutcome, ExportReport, ImportOptions,
    ImportOutcome,
};
pub use telemetry::init_tracing;
pub use vars::{ProcessEnvironment, Resolved, Variable, VariableResolver, VariableSource};

/// chanvcs version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
