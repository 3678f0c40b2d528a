//! Capability interfaces for the two external systems the engine talks to.
//!
//! - `HostingApi`: the code-hosting platform (change metadata, files, CI, reviews, write actions)
//! - `LanguageModel`: a text-in/text-out model endpoint
//!
//! Production implementations live in their own crates; in-memory substitutes
//! for tests live in [`crate::fakes`]. Implementations own their retry policy:
//! the engine never retries a call.

use async_trait::async_trait;

use crate::domain::{
    ChangeId, ChangeRequest, CheckRun, CombinedStatus, CommentRecord, FileDelta, HostingResult,
    ModelResult, RepoPermission, ReviewRecord,
};

// ---------------------------------------------------------------------------
// HostingApi
// ---------------------------------------------------------------------------

/// Read and write access to a code-hosting platform.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Login of the identity the client authenticates as.
    async fn authenticated_user(&self) -> HostingResult<String>;

    async fn change(&self, id: &ChangeId) -> HostingResult<ChangeRequest>;

    async fn changed_files(&self, id: &ChangeId) -> HostingResult<Vec<FileDelta>>;

    async fn combined_status(&self, id: &ChangeId, git_ref: &str) -> HostingResult<CombinedStatus>;

    async fn check_runs(&self, id: &ChangeId, git_ref: &str) -> HostingResult<Vec<CheckRun>>;

    async fn reviews(&self, id: &ChangeId) -> HostingResult<Vec<ReviewRecord>>;

    /// Conversation-level comments.
    async fn issue_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>>;

    /// Inline diff comments.
    async fn review_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>>;

    async fn user_permission(&self, id: &ChangeId, login: &str) -> HostingResult<RepoPermission>;

    /// Open changes of a repository, for polling.
    async fn open_changes(&self, owner: &str, repo: &str) -> HostingResult<Vec<ChangeId>>;

    async fn approve(&self, id: &ChangeId, body: &str) -> HostingResult<()>;

    async fn enable_auto_merge(&self, id: &ChangeId) -> HostingResult<()>;

    async fn merge(&self, id: &ChangeId) -> HostingResult<()>;

    async fn update_branch(&self, id: &ChangeId) -> HostingResult<()>;
}

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    /// Instructions the model should treat as authoritative.
    pub system: String,
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl PromptRequest {
    /// Request with bounded output and greedy sampling.
    pub fn deterministic(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_output_tokens: 500,
            temperature: 0.0,
        }
    }
}

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stable identifier used in audit trails and consensus maps.
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &PromptRequest) -> ModelResult<String>;
}
