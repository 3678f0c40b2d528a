//! Existing human feedback on a change. Read-only input to the review gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::AuthorAssociation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

impl ReviewState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewState::Approved => "APPROVED",
            ReviewState::ChangesRequested => "CHANGES_REQUESTED",
            ReviewState::Commented => "COMMENTED",
            ReviewState::Dismissed => "DISMISSED",
            ReviewState::Pending => "PENDING",
        }
    }

    /// States that count as someone having weighed in on the change.
    pub fn is_substantive(self) -> bool {
        matches!(
            self,
            ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Commented
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reviewer: String,
    pub association: AuthorAssociation,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ReviewRecord {
    pub fn new(reviewer: impl Into<String>, state: ReviewState) -> Self {
        Self {
            reviewer: reviewer.into(),
            association: AuthorAssociation::None,
            state,
            submitted_at: None,
        }
    }
}

/// Where a comment was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// Conversation-level comment.
    Issue,
    /// Inline comment on a diff line.
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub author: String,
    pub association: AuthorAssociation,
    pub kind: CommentKind,
    pub created_at: Option<DateTime<Utc>>,
}

impl CommentRecord {
    pub fn new(author: impl Into<String>, association: AuthorAssociation, kind: CommentKind) -> Self {
        Self {
            author: author.into(),
            association,
            kind,
            created_at: None,
        }
    }
}
