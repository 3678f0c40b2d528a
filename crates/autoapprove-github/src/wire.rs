//! GitHub REST payloads and their conversion into domain types.
//!
//! Only the fields the engine reads are declared; everything else in the
//! responses is ignored.

use autoapprove_core::{
    Author, AuthorAssociation, ChangeId, ChangeRequest, ChangeState, CheckConclusion, CheckRun,
    CheckRunStatus, CombinedStatus, CommentKind, CommentRecord, CommitStatus, FileDelta,
    ReviewRecord, ReviewState, StatusState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl User {
    fn into_author(self) -> Author {
        if self.kind == "Bot" {
            Author::bot(self.login)
        } else {
            Author::user(self.login)
        }
    }
}

fn login(user: Option<User>) -> String {
    user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub node_id: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    /// `clean` when the change can be merged right now.
    #[serde(default)]
    pub mergeable_state: Option<String>,
    pub user: User,
    #[serde(default = "unknown_association")]
    pub author_association: AuthorAssociation,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    pub base: Branch,
    pub head: Branch,
}

fn unknown_association() -> AuthorAssociation {
    AuthorAssociation::None
}

impl PullRequest {
    pub fn into_change(self, id: &ChangeId) -> ChangeRequest {
        let state = if self.merged || self.merged_at.is_some() {
            ChangeState::Merged
        } else if self.state == "open" {
            ChangeState::Open
        } else {
            ChangeState::Closed
        };
        ChangeRequest {
            id: id.clone(),
            title: self.title,
            description: self.body.unwrap_or_default(),
            state,
            draft: self.draft,
            author: self.user.into_author(),
            author_association: self.author_association,
            created_at: self.created_at,
            updated_at: self.updated_at,
            changed_files: self.changed_files,
            additions: self.additions,
            deletions: self.deletions,
            base_ref: self.base.git_ref,
            head_ref: self.head.git_ref,
            head_sha: self.head.sha.filter(|s| !s.is_empty()),
        }
    }
}

/// Entry of `GET /repos/{o}/{r}/pulls?state=open`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullSummary {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub filename: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
}

impl From<File> for FileDelta {
    fn from(file: File) -> Self {
        FileDelta {
            path: file.filename,
            additions: file.additions,
            deletions: file.deletions,
            patch: file.patch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Combined {
    pub state: StatusState,
    #[serde(default)]
    pub statuses: Vec<Status>,
}

impl From<Combined> for CombinedStatus {
    fn from(combined: Combined) -> Self {
        CombinedStatus {
            state: combined.state,
            statuses: combined
                .statuses
                .into_iter()
                .map(|s| {
                    CommitStatus::new(s.context, s.state)
                        .with_description(s.description.unwrap_or_default())
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckOutput {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Check {
    pub name: String,
    pub status: CheckRunStatus,
    #[serde(default)]
    pub conclusion: Option<CheckConclusion>,
    #[serde(default)]
    pub output: Option<CheckOutput>,
}

impl From<Check> for CheckRun {
    fn from(check: Check) -> Self {
        CheckRun {
            name: check.name,
            status: check.status,
            conclusion: check.conclusion,
            output_title: check.output.and_then(|o| o.title),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRunPage {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub check_runs: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub user: Option<User>,
    pub state: ReviewState,
    #[serde(default = "unknown_association")]
    pub author_association: AuthorAssociation,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<Review> for ReviewRecord {
    fn from(review: Review) -> Self {
        ReviewRecord {
            reviewer: login(review.user),
            association: review.author_association,
            state: review.state,
            submitted_at: review.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default = "unknown_association")]
    pub author_association: AuthorAssociation,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn into_record(self, kind: CommentKind) -> CommentRecord {
        CommentRecord {
            author: login(self.user),
            association: self.author_association,
            kind,
            created_at: self.created_at,
        }
    }
}

/// `GET /repos/{o}/{r}/collaborators/{login}/permission`.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionLevel {
    pub permission: String,
    /// Finer-grained role (`triage`, `maintain`, custom roles).
    #[serde(default)]
    pub role_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CreateReview<'a> {
    pub body: &'a str,
    pub event: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MergeRequest {
    pub merge_method: &'static str,
}

#[derive(Debug, Serialize)]
pub struct GraphQlRequest {
    pub query: &'static str,
    pub variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

pub const ENABLE_AUTO_MERGE: &str = "mutation($pullRequestId: ID!) { \
    enablePullRequestAutoMerge(input: { pullRequestId: $pullRequestId, mergeMethod: SQUASH }) { \
    pullRequest { number } } }";
