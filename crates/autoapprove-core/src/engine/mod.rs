//! Decision Engine
//!
//! Runs the ordered gate pipeline for one change and produces a
//! [`Decision`]. The first failing gate ends the evaluation. Any gate whose
//! precondition cannot be verified rejects; nothing is retried here.
//!
//! Gate order: state, age, size, reviews and comments, first-time
//! contributor, file retrieval, content security, CI, semantic analysis.
//!
//! # Modules
//!
//! - [`age`]: last-activity window, duration formatting
//! - [`ci`]: commit status and check run evaluation
//! - [`semantic`]: verdict to rejection reason mapping

pub mod age;
pub mod ci;
pub mod semantic;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::analyzer::{render_prompt, PromptContext, SingleModelAnalyzer};
use crate::collaborator::HostingApi;
use crate::config::EngineConfig;
use crate::consensus::{ConsensusEngine, ConsensusError};
use crate::defense::{self, detect_threats, sanitize_context, sanitize_files};
use crate::domain::{
    ChangeId, ChangeRequest, ChangeState, CommentRecord, ConsensusVerdict, Decision, EngineError,
    EngineResult, FileDelta, HostingResult, ReviewState,
};
use crate::obs::{self, EvaluationSpan};
use crate::validator::{classify_file, is_safe_change, protected_kind, validate_patch};

/// Why the pipeline stopped early.
enum Halt {
    /// A gate rejected the change.
    Reject { gate: &'static str, reason: String },
    /// The evaluation cannot produce a decision at all.
    Abort(EngineError),
}

impl From<EngineError> for Halt {
    fn from(err: EngineError) -> Self {
        Halt::Abort(err)
    }
}

fn reject(gate: &'static str, reason: impl Into<String>) -> Halt {
    Halt::Reject {
        gate,
        reason: reason.into(),
    }
}

/// Await `fut` unless `cancel` fires first.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Halt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Halt::Abort(EngineError::Cancelled)),
        out = fut => Ok(out),
    }
}

/// Mutable state of one evaluation.
struct Evaluation<'a> {
    id: &'a ChangeId,
    now: DateTime<Utc>,
    cancel: &'a CancellationToken,
    viewer: Option<String>,
    details: Vec<String>,
    already_approved_by_us: bool,
    is_own_change: bool,
    consensus_resolved: bool,
}

impl Evaluation<'_> {
    fn is_viewer(&self, login: &str) -> bool {
        self.viewer
            .as_deref()
            .is_some_and(|v| !v.is_empty() && v.eq_ignore_ascii_case(login))
    }

    fn into_decision(self, approvable: bool, reason: String) -> Decision {
        Decision {
            change: self.id.clone(),
            approvable,
            reason,
            details: self.details,
            already_approved_by_us: self.already_approved_by_us,
            is_own_change: self.is_own_change,
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionEngine
// ---------------------------------------------------------------------------

pub struct DecisionEngine {
    hosting: Arc<dyn HostingApi>,
    analyzer: Option<SingleModelAnalyzer>,
    consensus: Option<ConsensusEngine>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(hosting: Arc<dyn HostingApi>, config: EngineConfig) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(Self {
            hosting,
            analyzer: None,
            consensus: None,
            config,
        })
    }

    /// Enable the whole-change semantic gate.
    pub fn with_analyzer(mut self, analyzer: SingleModelAnalyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Enable consensus override for trusted authors.
    pub fn with_consensus(mut self, consensus: ConsensusEngine) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hosting(&self) -> &Arc<dyn HostingApi> {
        &self.hosting
    }

    /// Evaluate `id` against the current time.
    pub async fn evaluate(&self, id: &ChangeId, cancel: &CancellationToken) -> EngineResult<Decision> {
        self.evaluate_at(id, Utc::now(), cancel).await
    }

    /// Evaluate `id` as of `now`.
    ///
    /// `Err` means no decision exists: the identity was malformed or the
    /// evaluation was cancelled. Every policy outcome, including collaborator
    /// failures, is an `Ok` decision.
    pub async fn evaluate_at(
        &self,
        id: &ChangeId,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EngineResult<Decision> {
        id.validate()?;
        let span = EvaluationSpan::new(id);
        let started = Instant::now();

        let mut ev = Evaluation {
            id,
            now,
            cancel,
            viewer: None,
            details: Vec::new(),
            already_approved_by_us: false,
            is_own_change: false,
            consensus_resolved: false,
        };

        let outcome = async {
            obs::emit_evaluation_started(id);
            self.run(&mut ev).await
        }
        .instrument(span.span())
        .await;

        let decision = match outcome {
            Ok(()) => ev.into_decision(true, Decision::APPROVED_REASON.to_string()),
            Err(Halt::Reject { gate, reason }) => {
                span.span().in_scope(|| obs::emit_gate_rejected(gate, &reason));
                ev.into_decision(false, reason)
            }
            Err(Halt::Abort(err)) => return Err(err),
        };

        span.span().in_scope(|| {
            obs::emit_evaluation_finished(
                id,
                decision.approvable,
                &decision.reason,
                started.elapsed().as_millis() as u64,
            )
        });
        Ok(decision)
    }

    async fn run(&self, ev: &mut Evaluation<'_>) -> Result<(), Halt> {
        if ev.cancel.is_cancelled() {
            return Err(Halt::Abort(EngineError::Cancelled));
        }

        let change = match guarded(ev.cancel, self.hosting.change(ev.id)).await? {
            Ok(change) => change,
            Err(err) => {
                ev.details.push(format!("Change fetch error: {err}"));
                return Err(reject("state", "Unable to fetch change request"));
            }
        };
        ev.viewer = match guarded(ev.cancel, self.hosting.authenticated_user()).await? {
            Ok(login) => Some(login),
            Err(err) => {
                warn!(error = %err, "could not resolve authenticated user");
                None
            }
        };
        let dependency_bot = self.config.is_dependency_bot(&change.author.login);

        // 1. state
        if change.state != ChangeState::Open {
            return Err(reject("state", "PR is not open"));
        }
        if self.config.skip_draft && change.draft {
            return Err(reject("state", "PR is a draft"));
        }
        obs::emit_gate_passed("state");

        // 2. own change: flag only
        if ev.is_viewer(&change.author.login) {
            ev.is_own_change = true;
            ev.details
                .push(format!("PR author ({}) is the current user", change.author.login));
        }

        // 3. age
        let last_activity = change.last_activity().map(|t| age::elapsed(t, ev.now));
        if let Some(elapsed) = last_activity {
            if let Some(reason) = age::check(elapsed, self.config.min_open(), self.config.max_open()) {
                return Err(reject("age", reason));
            }
        }
        obs::emit_gate_passed("age");

        // 4. size
        if change.changed_files > self.config.max_files {
            return Err(reject(
                "size",
                format!(
                    "Too many files changed ({} > {})",
                    change.changed_files, self.config.max_files
                ),
            ));
        }
        if !dependency_bot && change.total_lines() > self.config.max_lines {
            return Err(reject(
                "size",
                format!(
                    "Too many lines changed ({} > {})",
                    change.total_lines(),
                    self.config.max_lines
                ),
            ));
        }
        obs::emit_gate_passed("size");

        ev.details.push(format!(
            "Author: {} ({})",
            change.author.login, change.author_association
        ));
        if let Some(elapsed) = last_activity {
            ev.details
                .push(format!("Last push: {} ago", age::format_duration(elapsed)));
        }

        // 5. reviews and comments
        self.review_gate(ev).await?;
        self.comment_gate(ev).await?;

        // 6. first-time contributor
        if self.config.skip_first_time && change.author_association.is_first_time() {
            ev.details
                .push(format!("User {} is a first-time contributor", change.author.login));
            return Err(reject("first_time", "First-time contributor"));
        }

        // 7. content retrieval
        let mut files = match guarded(ev.cancel, self.hosting.changed_files(ev.id)).await? {
            Ok(files) => files,
            Err(err) => {
                ev.details.push(format!("File fetch error: {err}"));
                return Err(reject("files", "Unable to fetch PR files for analysis"));
            }
        };
        if files.is_empty() {
            return Err(reject("files", "Change has no file content to verify"));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        obs::emit_gate_passed("files");

        // 8. content security
        self.content_gate(ev, &change, &files).await?;

        // 9. CI
        if self.config.require_passing_checks {
            self.ci_gate(ev, &change).await?;
        }

        // 10. semantic analysis
        self.semantic_gate(ev, &change, &files, dependency_bot).await?;

        Ok(())
    }

    async fn review_gate(&self, ev: &mut Evaluation<'_>) -> Result<(), Halt> {
        let reviews = match guarded(ev.cancel, self.hosting.reviews(ev.id)).await? {
            Ok(reviews) => reviews,
            Err(err) => {
                ev.details.push(format!("Review fetch error: {err}"));
                return Err(reject("reviews", "Unable to verify existing reviews"));
            }
        };

        let mut ours = false;
        let mut others = Vec::new();
        for review in reviews.iter().filter(|r| r.state.is_substantive()) {
            // Only our own approval is exempt.
            if review.state == ReviewState::Approved && ev.is_viewer(&review.reviewer) {
                ours = true;
            } else {
                others.push(format!("Review by {}: {}", review.reviewer, review.state.as_str()));
            }
        }

        if !others.is_empty() {
            ev.details.extend(others);
            return Err(reject("reviews", "PR has existing reviews"));
        }
        if ours {
            ev.already_approved_by_us = true;
            ev.details.push("Already approved by current user".to_string());
        }
        obs::emit_gate_passed("reviews");
        Ok(())
    }

    async fn comment_gate(&self, ev: &mut Evaluation<'_>) -> Result<(), Halt> {
        fn elevated(comments: &[CommentRecord]) -> Option<&CommentRecord> {
            comments.iter().find(|c| c.association.is_elevated())
        }

        let issue: HostingResult<Vec<CommentRecord>> =
            guarded(ev.cancel, self.hosting.issue_comments(ev.id)).await?;
        match issue {
            Ok(comments) => {
                if let Some(c) = elevated(&comments) {
                    ev.details
                        .push(format!("Comment by {} ({})", c.author, c.association));
                    return Err(reject("comments", "PR has comments from collaborators"));
                }
            }
            Err(err) => {
                ev.details.push(format!("Comment fetch error: {err}"));
                return Err(reject("comments", "Unable to verify comments"));
            }
        }

        match guarded(ev.cancel, self.hosting.review_comments(ev.id)).await? {
            Ok(comments) => {
                if let Some(c) = elevated(&comments) {
                    ev.details
                        .push(format!("Review comment by {} ({})", c.author, c.association));
                    return Err(reject("comments", "PR has review comments from collaborators"));
                }
            }
            Err(err) => {
                ev.details.push(format!("Review comment fetch error: {err}"));
                return Err(reject("comments", "Unable to verify comments"));
            }
        }
        obs::emit_gate_passed("comments");
        Ok(())
    }

    async fn content_gate(
        &self,
        ev: &mut Evaluation<'_>,
        change: &ChangeRequest,
        files: &[FileDelta],
    ) -> Result<(), Halt> {
        let context = sanitize_context(change);
        let sanitized = sanitize_files(files);
        if detect_threats(&context, &sanitized) {
            let threats = defense::threat_details(&context, &sanitized);
            obs::emit_threat_detected(&threats);
            ev.details.extend(threats);
            return Err(reject("content", "Security threat detected in PR content"));
        }

        let mut trusted: Option<bool> = None;
        for (file, clean) in files.iter().zip(&sanitized) {
            let path = file.path.as_str();

            if let Some(kind) = protected_kind(path) {
                ev.details.push(format!("{path}: cannot be auto-approved"));
                return Err(reject("content", kind.rejection_reason()));
            }

            let Some(patch) = file.patch.as_deref() else {
                ev.details.push(format!("{path}: no diff available"));
                return Err(reject("content", "File content unavailable for verification"));
            };

            if let Err(violation) = validate_patch(patch, path) {
                if !violation.is_behavior_change() {
                    ev.details.push(format!("{path}: {violation}"));
                    return Err(reject("content", "Code changes contain security risks"));
                }
            } else if is_safe_change(patch, path) {
                debug!(path, "file validated as safe");
                ev.details.push(format!("{path}: validated as safe"));
                continue;
            }

            let profile = classify_file(path);
            let behavior_reason = if profile.is_config() {
                "Config changes could alter program behavior"
            } else {
                "Code changes could alter program behavior"
            };

            let consensus = match &self.consensus {
                Some(consensus) if self.config.multi_model => consensus,
                _ => {
                    ev.details.push(format!("{path}: non-comment changes"));
                    return Err(reject("content", behavior_reason));
                }
            };
            let is_trusted = match trusted {
                Some(known) => known,
                None => {
                    let known = self.author_trusted(ev, change).await?;
                    trusted = Some(known);
                    known
                }
            };
            if !is_trusted {
                ev.details.push(format!("{path}: non-comment changes"));
                return Err(reject("content", behavior_reason));
            }

            let prompt = render_prompt(
                &PromptContext {
                    id: &change.id,
                    author: &change.author.login,
                    association: change.author_association,
                    sanitized: &context,
                },
                std::slice::from_ref(clean),
            );
            let verdict = match consensus.analyze_with_consensus(&prompt, ev.cancel).await {
                Ok(verdict) => verdict,
                Err(ConsensusError::Cancelled) => return Err(Halt::Abort(EngineError::Cancelled)),
                Err(err) => {
                    ev.details.push(format!("{path}: {err}"));
                    return Err(reject("content", format!("{behavior_reason} (AI consensus failed)")));
                }
            };
            self.accept_consensus(ev, path, &verdict)?;
        }

        obs::emit_gate_passed("content");
        Ok(())
    }

    fn accept_consensus(
        &self,
        ev: &mut Evaluation<'_>,
        path: &str,
        verdict: &ConsensusVerdict,
    ) -> Result<(), Halt> {
        let bar = self.config.consensus_confidence_bar;
        if verdict.agreement && verdict.approved && verdict.confidence >= bar && !verdict.vetoes.any() {
            ev.consensus_resolved = true;
            ev.details.push(format!(
                "{path}: AI consensus approved (confidence: {:.2})",
                verdict.confidence
            ));
            return Ok(());
        }

        let why = if verdict.vetoes.any() {
            verdict.vetoes.names().join("; ")
        } else if verdict.agreement && verdict.approved {
            format!("confidence {:.2} below {:.2}", verdict.confidence, bar)
        } else {
            verdict.reason.clone()
        };
        ev.details.push(format!("{path}: AI rejection"));
        ev.details.extend(verdict.disagreements.iter().cloned());
        Err(reject("content", format!("Multi-model AI analysis rejected: {why}")))
    }

    async fn author_trusted(&self, ev: &Evaluation<'_>, change: &ChangeRequest) -> Result<bool, Halt> {
        let login = change.author.login.as_str();
        if self.config.is_trusted_user(login) {
            return Ok(true);
        }
        if self.config.trusted_roles.is_empty() {
            return Ok(false);
        }
        match guarded(ev.cancel, self.hosting.user_permission(ev.id, login)).await? {
            Ok(permission) => Ok(self.config.is_trusted_role(permission)),
            Err(err) => {
                warn!(login, error = %err, "could not resolve repository permission");
                Ok(false)
            }
        }
    }

    async fn ci_gate(&self, ev: &mut Evaluation<'_>, change: &ChangeRequest) -> Result<(), Halt> {
        let Some(sha) = change.head_sha.as_deref() else {
            ev.details.push("Head commit unknown".to_string());
            return Err(reject("ci", "Unable to verify CI status"));
        };

        let status = match guarded(ev.cancel, self.hosting.combined_status(ev.id, sha)).await? {
            Ok(status) => status,
            Err(err) => {
                ev.details.push(format!("CI status error: {err}"));
                return Err(reject("ci", "Unable to verify CI status"));
            }
        };
        let runs = match guarded(ev.cancel, self.hosting.check_runs(ev.id, sha)).await? {
            Ok(runs) => runs,
            Err(err) => {
                ev.details.push(format!("Check runs error: {err}"));
                return Err(reject("ci", "Unable to verify check runs"));
            }
        };

        let statuses_ok =
            ci::statuses_passing(&status, change.author.is_bot, self.config.ignore_signing_checks);
        if !statuses_ok || !ci::check_runs_passing(&runs) {
            ev.details.extend(ci::status_details(&status));
            ev.details.extend(ci::check_run_details(&runs));
            return Err(reject("ci", "CI checks not passing"));
        }
        obs::emit_gate_passed("ci");
        Ok(())
    }

    async fn semantic_gate(
        &self,
        ev: &mut Evaluation<'_>,
        change: &ChangeRequest,
        files: &[FileDelta],
        dependency_bot: bool,
    ) -> Result<(), Halt> {
        let analyzer = match &self.analyzer {
            Some(analyzer) if self.config.semantic_analysis && !ev.consensus_resolved => analyzer,
            _ => return Ok(()),
        };

        let verdict = match guarded(ev.cancel, analyzer.analyze(files, change)).await? {
            Ok(verdict) => verdict,
            Err(err) => {
                ev.details.push(format!("AI analysis error: {err}"));
                return Err(reject("semantic", "AI analysis unavailable"));
            }
        };
        ev.details.push(semantic::summary(&verdict, dependency_bot));
        if let Some(reason) = semantic::rejection(&verdict, dependency_bot) {
            return Err(reject("semantic", reason));
        }
        obs::emit_gate_passed("semantic");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{sample_change, FakeHosting, HostingOp, ScriptedModel};
    use crate::domain::{AnalysisVerdict, Category, HostingError, ReviewRecord};

    const README_FIX: &str = "@@ -1,3 +1,3 @@\n # Project\n-Teh quick start\n+The quick start\n";

    fn setup() -> (Arc<FakeHosting>, ChangeId) {
        let id = ChangeId::new("acme", "widgets", 7);
        let hosting = Arc::new(FakeHosting::with_viewer("approver-bot"));
        hosting.insert_change(sample_change(&id, "alice"));
        hosting.set_files(&id, vec![FileDelta::new("README.md", README_FIX)]);
        (hosting, id)
    }

    fn engine(hosting: Arc<FakeHosting>) -> DecisionEngine {
        let config = EngineConfig {
            semantic_analysis: false,
            ..EngineConfig::default()
        };
        DecisionEngine::new(hosting, config).unwrap()
    }

    #[tokio::test]
    async fn test_docs_fix_is_approvable() {
        let (hosting, id) = setup();
        let decision = engine(hosting).evaluate(&id, &CancellationToken::new()).await.unwrap();

        assert!(decision.approvable, "{decision:?}");
        assert_eq!(decision.reason, Decision::APPROVED_REASON);
        assert!(decision.details.contains(&"Author: alice (CONTRIBUTOR)".to_string()));
        assert!(decision.details.contains(&"README.md: validated as safe".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_id_aborts() {
        let (hosting, _) = setup();
        let bad = ChangeId::new("", "widgets", 7);
        let err = engine(hosting).evaluate(&bad, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (hosting, id) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(hosting.clone()).evaluate(&id, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(hosting.call_count(HostingOp::Change), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_rejects_with_detail() {
        let (hosting, id) = setup();
        hosting.fail(HostingOp::Change, HostingError::Transient("reset".into()));
        let decision = engine(hosting).evaluate(&id, &CancellationToken::new()).await.unwrap();
        assert!(!decision.approvable);
        assert_eq!(decision.reason, "Unable to fetch change request");
        assert_eq!(decision.details, vec!["Change fetch error: transient failure: reset"]);
    }

    #[tokio::test]
    async fn test_viewer_approval_is_flagged_not_rejected() {
        let (hosting, id) = setup();
        hosting.add_review(&id, ReviewRecord::new("Approver-Bot", ReviewState::Approved));
        let decision = engine(hosting).evaluate(&id, &CancellationToken::new()).await.unwrap();
        assert!(decision.approvable);
        assert!(decision.already_approved_by_us);
    }

    #[tokio::test]
    async fn test_semantic_gate_uses_analyzer() {
        let (hosting, id) = setup();
        let mut flagged = AnalysisVerdict::benign(Category::Typo, "changes wording");
        flagged.confusing = true;
        let model = Arc::new(ScriptedModel::answering("m", &flagged));
        let engine = DecisionEngine::new(hosting, EngineConfig::default())
            .unwrap()
            .with_analyzer(SingleModelAnalyzer::new(model.clone()));

        let decision = engine.evaluate(&id, &CancellationToken::new()).await.unwrap();
        assert_eq!(decision.reason, "Changes may introduce confusion");
        assert_eq!(model.calls(), 1);
        assert!(decision
            .details
            .contains(&"AI flagged: confusing (typo change). Analysis: changes wording".to_string()));
    }
}
