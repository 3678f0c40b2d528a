//! In-memory collaborator substitutes (testing only)
//!
//! `FakeHosting` serves canned change data and records write actions;
//! `ScriptedModel` replays canned model replies. Neither touches the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborator::{HostingApi, LanguageModel, PromptRequest};
use chrono::{Duration as ChronoDuration, Utc};

use crate::domain::{
    AnalysisVerdict, Author, AuthorAssociation, ChangeId, ChangeRequest, ChangeState, CheckRun,
    CombinedStatus, CommentKind, CommentRecord, FileDelta, HostingError, HostingResult,
    ModelError, ModelResult, RepoPermission, ReviewRecord,
};

// ---------------------------------------------------------------------------
// FakeHosting
// ---------------------------------------------------------------------------

/// Operations of [`HostingApi`], used to inject failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostingOp {
    AuthenticatedUser,
    Change,
    ChangedFiles,
    CombinedStatus,
    CheckRuns,
    Reviews,
    IssueComments,
    ReviewComments,
    UserPermission,
    OpenChanges,
    Approve,
    EnableAutoMerge,
    Merge,
    UpdateBranch,
}

#[derive(Debug, Default)]
struct HostingState {
    viewer: Option<String>,
    changes: HashMap<ChangeId, ChangeRequest>,
    files: HashMap<ChangeId, Vec<FileDelta>>,
    statuses: HashMap<String, CombinedStatus>,
    check_runs: HashMap<String, Vec<CheckRun>>,
    reviews: HashMap<ChangeId, Vec<ReviewRecord>>,
    comments: HashMap<ChangeId, Vec<CommentRecord>>,
    permissions: HashMap<String, RepoPermission>,
    failures: HashMap<HostingOp, HostingError>,
    calls: HashMap<HostingOp, usize>,
    actions: Vec<(HostingOp, ChangeId)>,
}

/// In-memory hosting platform.
///
/// Missing data defaults to the quiet case: no files, no reviews, no
/// comments, a successful combined status, no check runs and `read`
/// permission. Unknown changes are `NotFound`.
#[derive(Debug, Default)]
pub struct FakeHosting {
    state: Mutex<HostingState>,
}

impl FakeHosting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake authenticated as `login`.
    pub fn with_viewer(login: &str) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().viewer = Some(login.to_string());
        fake
    }

    pub fn insert_change(&self, change: ChangeRequest) {
        let mut state = self.state.lock().unwrap();
        state.changes.insert(change.id.clone(), change);
    }

    pub fn set_files(&self, id: &ChangeId, files: Vec<FileDelta>) {
        self.state.lock().unwrap().files.insert(id.clone(), files);
    }

    pub fn set_combined_status(&self, git_ref: &str, status: CombinedStatus) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(git_ref.to_string(), status);
    }

    pub fn set_check_runs(&self, git_ref: &str, runs: Vec<CheckRun>) {
        let mut state = self.state.lock().unwrap();
        state.check_runs.insert(git_ref.to_string(), runs);
    }

    pub fn add_review(&self, id: &ChangeId, review: ReviewRecord) {
        let mut state = self.state.lock().unwrap();
        state.reviews.entry(id.clone()).or_default().push(review);
    }

    pub fn add_comment(&self, id: &ChangeId, comment: CommentRecord) {
        let mut state = self.state.lock().unwrap();
        state.comments.entry(id.clone()).or_default().push(comment);
    }

    pub fn set_permission(&self, login: &str, permission: RepoPermission) {
        let mut state = self.state.lock().unwrap();
        state.permissions.insert(login.to_ascii_lowercase(), permission);
    }

    /// Make every subsequent call of `op` fail with `error`.
    pub fn fail(&self, op: HostingOp, error: HostingError) {
        self.state.lock().unwrap().failures.insert(op, error);
    }

    pub fn call_count(&self, op: HostingOp) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Successful write actions, in call order.
    pub fn actions(&self) -> Vec<(HostingOp, ChangeId)> {
        self.state.lock().unwrap().actions.clone()
    }

    fn enter(&self, op: HostingOp) -> HostingResult<std::sync::MutexGuard<'_, HostingState>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(state),
        }
    }

    fn record(&self, op: HostingOp, id: &ChangeId) -> HostingResult<()> {
        let mut state = self.enter(op)?;
        if !state.changes.contains_key(id) {
            return Err(HostingError::NotFound(id.to_string()));
        }
        state.actions.push((op, id.clone()));
        Ok(())
    }

    fn comments_of(&self, op: HostingOp, id: &ChangeId, kind: CommentKind) -> HostingResult<Vec<CommentRecord>> {
        let state = self.enter(op)?;
        Ok(state
            .comments
            .get(id)
            .map(|all| all.iter().filter(|c| c.kind == kind).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl HostingApi for FakeHosting {
    async fn authenticated_user(&self) -> HostingResult<String> {
        let state = self.enter(HostingOp::AuthenticatedUser)?;
        state
            .viewer
            .clone()
            .ok_or_else(|| HostingError::Unauthorized("no viewer configured".into()))
    }

    async fn change(&self, id: &ChangeId) -> HostingResult<ChangeRequest> {
        let state = self.enter(HostingOp::Change)?;
        state
            .changes
            .get(id)
            .cloned()
            .ok_or_else(|| HostingError::NotFound(id.to_string()))
    }

    async fn changed_files(&self, id: &ChangeId) -> HostingResult<Vec<FileDelta>> {
        let state = self.enter(HostingOp::ChangedFiles)?;
        Ok(state.files.get(id).cloned().unwrap_or_default())
    }

    async fn combined_status(&self, _id: &ChangeId, git_ref: &str) -> HostingResult<CombinedStatus> {
        let state = self.enter(HostingOp::CombinedStatus)?;
        Ok(state
            .statuses
            .get(git_ref)
            .cloned()
            .unwrap_or_else(CombinedStatus::success))
    }

    async fn check_runs(&self, _id: &ChangeId, git_ref: &str) -> HostingResult<Vec<CheckRun>> {
        let state = self.enter(HostingOp::CheckRuns)?;
        Ok(state.check_runs.get(git_ref).cloned().unwrap_or_default())
    }

    async fn reviews(&self, id: &ChangeId) -> HostingResult<Vec<ReviewRecord>> {
        let state = self.enter(HostingOp::Reviews)?;
        Ok(state.reviews.get(id).cloned().unwrap_or_default())
    }

    async fn issue_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>> {
        self.comments_of(HostingOp::IssueComments, id, CommentKind::Issue)
    }

    async fn review_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>> {
        self.comments_of(HostingOp::ReviewComments, id, CommentKind::Review)
    }

    async fn user_permission(&self, _id: &ChangeId, login: &str) -> HostingResult<RepoPermission> {
        let state = self.enter(HostingOp::UserPermission)?;
        Ok(state
            .permissions
            .get(&login.to_ascii_lowercase())
            .copied()
            .unwrap_or(RepoPermission::Read))
    }

    async fn open_changes(&self, owner: &str, repo: &str) -> HostingResult<Vec<ChangeId>> {
        let state = self.enter(HostingOp::OpenChanges)?;
        let mut ids: Vec<ChangeId> = state
            .changes
            .values()
            .filter(|c| c.id.owner == owner && c.id.repo == repo)
            .filter(|c| c.state == ChangeState::Open)
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn approve(&self, id: &ChangeId, _body: &str) -> HostingResult<()> {
        self.record(HostingOp::Approve, id)
    }

    async fn enable_auto_merge(&self, id: &ChangeId) -> HostingResult<()> {
        self.record(HostingOp::EnableAutoMerge, id)
    }

    async fn merge(&self, id: &ChangeId) -> HostingResult<()> {
        self.record(HostingOp::Merge, id)
    }

    async fn update_branch(&self, id: &ChangeId) -> HostingResult<()> {
        self.record(HostingOp::UpdateBranch, id)
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Language model that replays queued replies, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedModel {
    id: String,
    queue: Mutex<VecDeque<ModelResult<String>>>,
    fallback: ModelResult<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<PromptRequest>>,
}

impl ScriptedModel {
    /// Model that always answers `reply`.
    pub fn replying(id: &str, reply: impl Into<String>) -> Self {
        Self::with_fallback(id, Ok(reply.into()))
    }

    /// Model that always answers with `verdict` serialized as JSON.
    pub fn answering(id: &str, verdict: &AnalysisVerdict) -> Self {
        Self::replying(id, verdict_json(verdict))
    }

    /// Model whose every call fails with `error`.
    pub fn failing(id: &str, error: ModelError) -> Self {
        Self::with_fallback(id, Err(error))
    }

    fn with_fallback(id: &str, fallback: ModelResult<String>) -> Self {
        Self {
            id: id.to_string(),
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a one-off reply ahead of the fallback.
    pub fn then(self, reply: ModelResult<String>) -> Self {
        self.queue.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &PromptRequest) -> ModelResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

/// An open, one-line change by a returning contributor, last pushed two
/// hours ago, with head commit `abc123`.
pub fn sample_change(id: &ChangeId, login: &str) -> ChangeRequest {
    let pushed = Utc::now() - ChronoDuration::hours(2);
    ChangeRequest {
        id: id.clone(),
        title: "Fix typo in README".to_string(),
        description: "Corrects a spelling mistake.".to_string(),
        state: ChangeState::Open,
        draft: false,
        author: Author::user(login),
        author_association: AuthorAssociation::Contributor,
        created_at: Some(pushed),
        updated_at: Some(pushed),
        changed_files: 1,
        additions: 1,
        deletions: 1,
        base_ref: "main".to_string(),
        head_ref: "fix-typo".to_string(),
        head_sha: Some("abc123".to_string()),
    }
}

/// Render a verdict the way a well-behaved model would answer.
pub fn verdict_json(verdict: &AnalysisVerdict) -> String {
    serde_json::to_string(verdict).unwrap_or_default()
}
