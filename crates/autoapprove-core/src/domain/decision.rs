//! The engine's final answer for one evaluation.

use serde::{Deserialize, Serialize};

use super::change::ChangeId;

/// Result of evaluating one change.
///
/// On approval `reason` is always [`Decision::APPROVED_REASON`]; use
/// [`Decision::rejection_reason`] when only the rejection matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub change: ChangeId,
    pub approvable: bool,
    pub reason: String,
    /// Audit trail in gate order.
    pub details: Vec<String>,
    pub already_approved_by_us: bool,
    pub is_own_change: bool,
}

impl Decision {
    pub const APPROVED_REASON: &'static str = "All checks passed";

    /// Primary rejection reason; `None` for an approvable change.
    pub fn rejection_reason(&self) -> Option<&str> {
        (!self.approvable).then_some(self.reason.as_str())
    }
}
