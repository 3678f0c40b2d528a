//! Structured observability hooks for the evaluation lifecycle.
//!
//! This module provides:
//! - Evaluation-scoped tracing spans via `EvaluationSpan`
//! - Emission functions for gate outcomes, consensus votes, threats and write actions
//!
//! Events are emitted at `info!` level, except threat detection and action
//! failures which use `warn!`. Filter with `RUST_LOG`.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::ChangeId;

/// Evaluation-scoped span tagged with the change and a fresh evaluation id.
///
/// Attach it to the evaluation future with `tracing::Instrument` so that it
/// follows the future across await points and worker threads.
///
/// ```ignore
/// let span = EvaluationSpan::new(&id);
/// run(&id).instrument(span.span()).await;
/// ```
pub struct EvaluationSpan {
    evaluation_id: Uuid,
    span: tracing::Span,
}

impl EvaluationSpan {
    pub fn new(change: &ChangeId) -> Self {
        let evaluation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "autoapprove.evaluation",
            change = %change,
            evaluation_id = %evaluation_id,
        );
        Self { evaluation_id, span }
    }

    pub fn evaluation_id(&self) -> Uuid {
        self.evaluation_id
    }

    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

pub fn emit_evaluation_started(change: &ChangeId) {
    info!(event = "evaluation.started", change = %change);
}

/// Emit event: a gate let the change through.
pub fn emit_gate_passed(gate: &str) {
    info!(event = "gate.passed", gate = %gate);
}

/// Emit event: a gate terminated the evaluation.
pub fn emit_gate_rejected(gate: &str, reason: &str) {
    info!(event = "gate.rejected", gate = %gate, reason = %reason);
}

pub fn emit_evaluation_finished(change: &ChangeId, approvable: bool, reason: &str, duration_ms: u64) {
    info!(
        event = "evaluation.finished",
        change = %change,
        approvable = approvable,
        reason = %reason,
        duration_ms = duration_ms,
    );
}

/// Emit event: one consensus model answered.
pub fn emit_model_result(model: &str, alters_behavior: bool, confidence: f64) {
    info!(
        event = "consensus.model_result",
        model = %model,
        alters_behavior = alters_behavior,
        confidence = confidence,
    );
}

/// Emit event: a model's answer fell below its own confidence threshold.
pub fn emit_model_excluded(model: &str, confidence: f64, required: f64) {
    info!(
        event = "consensus.model_excluded",
        model = %model,
        confidence = confidence,
        required = required,
    );
}

pub fn emit_consensus_finished(agreement: bool, approved: bool, qualifying: usize, used: usize) {
    info!(
        event = "consensus.finished",
        agreement = agreement,
        approved = approved,
        qualifying = qualifying,
        models_used = used,
    );
}

/// Emit event: hostile content found in change input (warning level).
pub fn emit_threat_detected(details: &[String]) {
    warn!(event = "defense.threat_detected", details = ?details);
}

/// Emit event: one write action finished.
pub fn emit_action_step(change: &ChangeId, step: &str, outcome: &str) {
    info!(event = "action.step", change = %change, step = %step, outcome = %outcome);
}

/// Emit event: a write action failed (warning level).
pub fn emit_action_failed(change: &ChangeId, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "action.failed", change = %change, step = %step, error = %error);
}
