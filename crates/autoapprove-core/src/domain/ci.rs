//! CI signal attached to a commit: legacy commit statuses and check runs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Success,
    Pending,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Success => "success",
            StatusState::Pending => "pending",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }

    pub fn is_failing(self) -> bool {
        matches!(self, StatusState::Failure | StatusState::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: String,
}

impl CommitStatus {
    pub fn new(context: impl Into<String>, state: StatusState) -> Self {
        Self {
            context: context.into(),
            state,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Aggregate status of a commit across every status context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub state: StatusState,
    pub statuses: Vec<CommitStatus>,
}

impl CombinedStatus {
    pub fn success() -> Self {
        Self {
            state: StatusState::Success,
            statuses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
    Skipped,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Stale,
    #[serde(other)]
    Unknown,
}

impl CheckConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Neutral => "neutral",
            CheckConclusion::Skipped => "skipped",
            CheckConclusion::Failure => "failure",
            CheckConclusion::Cancelled => "cancelled",
            CheckConclusion::TimedOut => "timed_out",
            CheckConclusion::ActionRequired => "action_required",
            CheckConclusion::Stale => "stale",
            CheckConclusion::Unknown => "unknown",
        }
    }

    /// Conclusions that do not block a merge.
    pub fn is_passing(self) -> bool {
        matches!(
            self,
            CheckConclusion::Success | CheckConclusion::Neutral | CheckConclusion::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckConclusion>,
    /// Title of the check's output summary, if any.
    #[serde(default)]
    pub output_title: Option<String>,
}

impl CheckRun {
    pub fn completed(name: impl Into<String>, conclusion: CheckConclusion) -> Self {
        Self {
            name: name.into(),
            status: CheckRunStatus::Completed,
            conclusion: Some(conclusion),
            output_title: None,
        }
    }

    pub fn in_progress(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckRunStatus::InProgress,
            conclusion: None,
            output_title: None,
        }
    }
}
