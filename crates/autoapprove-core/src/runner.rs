//! Action runner: turns an approvable [`Decision`] into write actions.
//!
//! The write sequence is approve, then optionally enable auto-merge, then
//! optionally update the branch. Each step is reported on its own and a
//! failed step never undoes an earlier one.
//!
//! [`Reviewer`] ties evaluation and actions together behind an
//! [`InFlightRegistry`] so one change is never reviewed twice at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::collaborator::HostingApi;
use crate::config::ActionConfig;
use crate::domain::{ChangeId, Decision, EngineError, HostingError};
use crate::engine::DecisionEngine;
use crate::obs;

/// Write-side knobs, usually taken from [`ActionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOptions {
    pub dry_run: bool,
    pub auto_merge: bool,
    pub update_branch: bool,
    pub approval_body: String,
}

impl From<&ActionConfig> for ActionOptions {
    fn from(config: &ActionConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            auto_merge: config.auto_merge,
            update_branch: config.update_branch,
            approval_body: config.approval_body.clone(),
        }
    }
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self::from(&ActionConfig::default())
    }
}

/// What happened to one write step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    /// Dry run: the step would have run.
    Planned,
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Done => "done",
            StepOutcome::Planned => "planned",
            StepOutcome::Skipped(_) => "skipped",
            StepOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Per-step outcomes of one [`ActionRunner::apply`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub approve: StepOutcome,
    pub auto_merge: StepOutcome,
    pub update_branch: StepOutcome,
}

impl ActionReport {
    fn skipped(reason: &str) -> Self {
        Self {
            approve: StepOutcome::Skipped(reason.to_string()),
            auto_merge: StepOutcome::Skipped(reason.to_string()),
            update_branch: StepOutcome::Skipped(reason.to_string()),
        }
    }

    pub fn has_failures(&self) -> bool {
        [&self.approve, &self.auto_merge, &self.update_branch]
            .into_iter()
            .any(StepOutcome::is_failure)
    }
}

// ---------------------------------------------------------------------------
// ActionRunner
// ---------------------------------------------------------------------------

pub struct ActionRunner {
    hosting: Arc<dyn HostingApi>,
    options: ActionOptions,
}

impl ActionRunner {
    pub fn new(hosting: Arc<dyn HostingApi>, options: ActionOptions) -> Self {
        Self { hosting, options }
    }

    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    /// Run the write sequence for `decision`.
    ///
    /// Rejections produce no write call. Approval is skipped for the viewer's
    /// own change and for a change the viewer already approved; merge and
    /// branch steps are skipped when approval itself failed.
    pub async fn apply(&self, decision: &Decision) -> ActionReport {
        let id = &decision.change;
        if !decision.approvable {
            return ActionReport::skipped("not approvable");
        }

        let approve = if decision.is_own_change {
            StepOutcome::Skipped("own change".to_string())
        } else if decision.already_approved_by_us {
            StepOutcome::Skipped("already approved".to_string())
        } else if self.options.dry_run {
            StepOutcome::Planned
        } else {
            step_outcome(id, "approve", self.hosting.approve(id, &self.options.approval_body).await)
        };
        obs::emit_action_step(id, "approve", approve.as_str());

        let follow_up = |enabled: bool| -> Option<StepOutcome> {
            if !enabled {
                Some(StepOutcome::Skipped("disabled".to_string()))
            } else if approve.is_failure() {
                Some(StepOutcome::Skipped("approval failed".to_string()))
            } else if self.options.dry_run {
                Some(StepOutcome::Planned)
            } else {
                None
            }
        };

        let auto_merge = match follow_up(self.options.auto_merge) {
            Some(outcome) => outcome,
            None => self.merge(id).await,
        };
        obs::emit_action_step(id, "auto_merge", auto_merge.as_str());

        let update_branch = match follow_up(self.options.update_branch) {
            Some(outcome) => outcome,
            None => step_outcome(id, "update_branch", self.hosting.update_branch(id).await),
        };
        obs::emit_action_step(id, "update_branch", update_branch.as_str());

        ActionReport {
            approve,
            auto_merge,
            update_branch,
        }
    }

    /// Enable auto-merge. Merges immediately only when the platform reports
    /// the change as already mergeable; any other failure is reported.
    async fn merge(&self, id: &ChangeId) -> StepOutcome {
        match self.hosting.enable_auto_merge(id).await {
            Ok(()) => StepOutcome::Done,
            Err(HostingError::ReadyToMerge) => {
                debug!(change = %id, "already mergeable, merging directly");
                step_outcome(id, "merge", self.hosting.merge(id).await)
            }
            Err(err) => {
                obs::emit_action_failed(id, "auto_merge", &err);
                StepOutcome::Failed(err.to_string())
            }
        }
    }
}

fn step_outcome(id: &ChangeId, step: &str, result: Result<(), HostingError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(err) => {
            obs::emit_action_failed(id, step, &err);
            StepOutcome::Failed(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight registry
// ---------------------------------------------------------------------------

/// Set of changes currently under review.
#[derive(Debug, Default, Clone)]
pub struct InFlightRegistry {
    active: Arc<Mutex<HashSet<ChangeId>>>,
}

/// Held while a change is under review; releases the change on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    id: ChangeId,
    active: Arc<Mutex<HashSet<ChangeId>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` when another review of it is running.
    pub fn try_acquire(&self, id: &ChangeId) -> Option<InFlightPermit> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.insert(id.clone()).then(|| InFlightPermit {
            id: id.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_in_flight(&self, id: &ChangeId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("review of {0} already in flight")]
    AlreadyInFlight(ChangeId),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Decision plus the write actions taken for it.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub decision: Decision,
    pub actions: ActionReport,
}

/// Evaluate-then-act for one change at a time per identity.
pub struct Reviewer {
    engine: Arc<DecisionEngine>,
    runner: ActionRunner,
    in_flight: InFlightRegistry,
}

impl Reviewer {
    pub fn new(engine: Arc<DecisionEngine>, runner: ActionRunner, in_flight: InFlightRegistry) -> Self {
        Self {
            engine,
            runner,
            in_flight,
        }
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub async fn review(
        &self,
        id: &ChangeId,
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome, ReviewError> {
        let _permit = self
            .in_flight
            .try_acquire(id)
            .ok_or_else(|| ReviewError::AlreadyInFlight(id.clone()))?;

        let decision = self.engine.evaluate(id, cancel).await?;
        // No write action once the caller has given up.
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        let span = tracing::info_span!("autoapprove.actions", change = %id);
        let actions = self.runner.apply(&decision).instrument(span).await;
        Ok(ReviewOutcome { decision, actions })
    }
}
