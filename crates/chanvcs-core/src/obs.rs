//! Structured observability hooks for chanvcs lifecycle events.
//!
//! This module provides:
//! - Channel-scoped tracing spans via `ChannelSpan` RAII guard
//! - Emission functions for key lifecycle events: export, import, promotion
//!   transitions, delta detection and batch item failures
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use tracing::{info, warn};

/// RAII guard that enters a channel-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = ChannelSpan::enter("export", "a1b2");
/// // every tracing call now carries operation = "export", channel_id = "a1b2"
/// ```
pub struct ChannelSpan {
    _span: tracing::span::EnteredSpan,
}

impl ChannelSpan {
    pub fn enter(operation: &str, channel_id: &str) -> Self {
        let span = tracing::info_span!("chanvcs.channel", operation = %operation, channel_id = %channel_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a channel was written into an environment tree.
pub fn emit_export_finished(environment: &str, channel_id: &str, files: usize, masked: usize) {
    info!(
        event = "export.finished",
        environment = %environment,
        channel_id = %channel_id,
        files = files,
        masked_secrets = masked,
    );
}

/// Emit event: a channel was assembled for an environment.
pub fn emit_import_finished(environment: &str, channel_id: &str, unresolved: usize, applied: bool) {
    info!(
        event = "import.finished",
        environment = %environment,
        channel_id = %channel_id,
        unresolved = unresolved,
        applied = applied,
    );
}

/// Emit event: a channel moved to a new promotion state.
pub fn emit_promotion_transition(promotion_id: &str, channel_id: &str, from: &str, to: &str) {
    info!(
        event = "promotion.transition",
        promotion_id = %promotion_id,
        channel_id = %channel_id,
        from = %from,
        to = %to,
    );
}

/// Emit event: changed channels found between two revisions.
pub fn emit_delta_detected(environment: &str, from: &str, to: &str, changed: usize, removed: usize) {
    info!(
        event = "delta.detected",
        environment = %environment,
        from = %from,
        to = %to,
        changed = changed,
        removed = removed,
    );
}

/// Emit event: one item of a batch failed (warning level).
pub fn emit_batch_item_failed(operation: &str, id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "batch.item_failed", operation = %operation, id = %id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_span_enters_without_subscriber() {
        let _span = ChannelSpan::enter("export", "c1");
        emit_export_finished("staging", "c1", 3, 1);
        emit_batch_item_failed("import", "c1", &"boom");
    }
}
