//! Write-action sequencing and the in-flight guard.

use std::sync::Arc;
use std::time::Duration;

use autoapprove_core::fakes::{sample_change, FakeHosting, HostingOp, ScriptedModel};
use autoapprove_core::{
    ActionOptions, ActionRunner, AnalysisVerdict, Category, ChangeId, ConsensusConfig,
    ConsensusEngine, Decision, DecisionEngine, EngineConfig, FileDelta, HostingError,
    InFlightRegistry, LanguageModel, ReviewError, Reviewer, StepOutcome,
};
use tokio_util::sync::CancellationToken;

fn id() -> ChangeId {
    ChangeId::new("acme", "widgets", 9)
}

fn approvable() -> Decision {
    Decision {
        change: id(),
        approvable: true,
        reason: Decision::APPROVED_REASON.to_string(),
        details: Vec::new(),
        already_approved_by_us: false,
        is_own_change: false,
    }
}

fn hosting() -> Arc<FakeHosting> {
    let hosting = Arc::new(FakeHosting::with_viewer("approver-bot"));
    hosting.insert_change(sample_change(&id(), "alice"));
    hosting.set_files(
        &id(),
        vec![FileDelta::new("README.md", "@@ -1 +1 @@\n-Helo\n+Hello\n")],
    );
    hosting
}

fn options(auto_merge: bool, update_branch: bool) -> ActionOptions {
    ActionOptions {
        dry_run: false,
        auto_merge,
        update_branch,
        approval_body: "LGTM".into(),
    }
}

#[tokio::test]
async fn test_full_sequence_in_order() {
    let hosting = hosting();
    let runner = ActionRunner::new(hosting.clone(), options(true, true));

    let report = runner.apply(&approvable()).await;
    assert_eq!(report.approve, StepOutcome::Done);
    assert_eq!(report.auto_merge, StepOutcome::Done);
    assert_eq!(report.update_branch, StepOutcome::Done);

    let ops: Vec<HostingOp> = hosting.actions().into_iter().map(|(op, _)| op).collect();
    assert_eq!(
        ops,
        vec![HostingOp::Approve, HostingOp::EnableAutoMerge, HostingOp::UpdateBranch]
    );
}

#[tokio::test]
async fn test_rejection_writes_nothing() {
    let hosting = hosting();
    let runner = ActionRunner::new(hosting.clone(), options(true, true));
    let mut decision = approvable();
    decision.approvable = false;
    decision.reason = "PR is a draft".into();

    let report = runner.apply(&decision).await;
    assert_eq!(report.approve, StepOutcome::Skipped("not approvable".into()));
    assert!(hosting.actions().is_empty());
}

#[tokio::test]
async fn test_dry_run_plans_only() {
    let hosting = hosting();
    let runner = ActionRunner::new(
        hosting.clone(),
        ActionOptions {
            dry_run: true,
            ..options(true, false)
        },
    );

    let report = runner.apply(&approvable()).await;
    assert_eq!(report.approve, StepOutcome::Planned);
    assert_eq!(report.auto_merge, StepOutcome::Planned);
    assert_eq!(report.update_branch, StepOutcome::Skipped("disabled".into()));
    assert!(hosting.actions().is_empty());
}

#[tokio::test]
async fn test_own_or_already_approved_skips_approval_only() {
    let hosting = hosting();
    let runner = ActionRunner::new(hosting.clone(), options(true, false));

    let mut decision = approvable();
    decision.is_own_change = true;
    let report = runner.apply(&decision).await;
    assert_eq!(report.approve, StepOutcome::Skipped("own change".into()));
    assert_eq!(report.auto_merge, StepOutcome::Done);

    let mut decision = approvable();
    decision.already_approved_by_us = true;
    let report = runner.apply(&decision).await;
    assert_eq!(report.approve, StepOutcome::Skipped("already approved".into()));
    assert_eq!(hosting.call_count(HostingOp::Approve), 0);
}

#[tokio::test]
async fn test_later_failure_keeps_approval() {
    let hosting = hosting();
    hosting.fail(
        HostingOp::UpdateBranch,
        HostingError::Api {
            status: 422,
            message: "merge conflict".into(),
        },
    );
    let runner = ActionRunner::new(hosting.clone(), options(false, true));

    let report = runner.apply(&approvable()).await;
    assert_eq!(report.approve, StepOutcome::Done);
    assert_eq!(
        report.update_branch,
        StepOutcome::Failed("api error 422: merge conflict".into())
    );
    assert!(report.has_failures());
    assert_eq!(hosting.actions(), vec![(HostingOp::Approve, id())]);
}

#[tokio::test]
async fn test_auto_merge_merges_directly_when_already_mergeable() {
    let hosting = hosting();
    hosting.fail(HostingOp::EnableAutoMerge, HostingError::ReadyToMerge);
    let runner = ActionRunner::new(hosting.clone(), options(true, false));

    let report = runner.apply(&approvable()).await;
    assert_eq!(report.auto_merge, StepOutcome::Done);
    let ops: Vec<HostingOp> = hosting.actions().into_iter().map(|(op, _)| op).collect();
    assert_eq!(ops, vec![HostingOp::Approve, HostingOp::Merge]);
}

#[tokio::test]
async fn test_auto_merge_failure_never_merges() {
    for error in [
        HostingError::Transient("gateway timeout".into()),
        HostingError::RateLimited { retry_after: None },
        HostingError::Api {
            status: 422,
            message: "auto-merge not allowed".into(),
        },
    ] {
        let hosting = hosting();
        hosting.fail(HostingOp::EnableAutoMerge, error.clone());
        let runner = ActionRunner::new(hosting.clone(), options(true, false));

        let report = runner.apply(&approvable()).await;
        assert_eq!(report.auto_merge, StepOutcome::Failed(error.to_string()));
        assert!(report.has_failures());
        assert_eq!(hosting.call_count(HostingOp::Merge), 0);
        assert_eq!(hosting.actions(), vec![(HostingOp::Approve, id())]);
    }
}

#[tokio::test]
async fn test_failed_approval_skips_follow_ups() {
    let hosting = hosting();
    hosting.fail(HostingOp::Approve, HostingError::Unauthorized("read-only token".into()));
    let runner = ActionRunner::new(hosting.clone(), options(true, true));

    let report = runner.apply(&approvable()).await;
    assert!(report.approve.is_failure());
    assert_eq!(report.auto_merge, StepOutcome::Skipped("approval failed".into()));
    assert_eq!(hosting.call_count(HostingOp::EnableAutoMerge), 0);
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reviewer_evaluates_and_acts() {
    let hosting = hosting();
    let engine = DecisionEngine::new(
        hosting.clone(),
        EngineConfig {
            semantic_analysis: false,
            ..EngineConfig::default()
        },
    )
    .unwrap();
    let reviewer = Reviewer::new(
        Arc::new(engine),
        ActionRunner::new(hosting.clone(), options(false, false)),
        InFlightRegistry::new(),
    );

    let outcome = reviewer.review(&id(), &CancellationToken::new()).await.unwrap();
    assert!(outcome.decision.approvable);
    assert_eq!(outcome.actions.approve, StepOutcome::Done);
    assert!(reviewer.in_flight().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_review_of_same_change_refused() {
    let hosting = hosting();
    hosting.set_files(
        &id(),
        vec![FileDelta::new("src/lib.rs", "@@ -1 +1 @@\n-let a = 1;\n+let a = 2;\n")],
    );
    let slow = |name: &str| -> Arc<dyn LanguageModel> {
        Arc::new(
            ScriptedModel::answering(name, &AnalysisVerdict::benign(Category::Refactor, "Adjusts a constant"))
                .with_delay(Duration::from_secs(5)),
        )
    };
    let consensus =
        ConsensusEngine::with_default_thresholds(vec![slow("a"), slow("b")], ConsensusConfig::default())
            .unwrap();
    let engine = DecisionEngine::new(
        hosting.clone(),
        EngineConfig {
            multi_model: true,
            trusted_users: vec!["alice".into()],
            semantic_analysis: false,
            ..EngineConfig::default()
        },
    )
    .unwrap()
    .with_consensus(consensus);
    let reviewer = Arc::new(Reviewer::new(
        Arc::new(engine),
        ActionRunner::new(hosting.clone(), options(false, false)),
        InFlightRegistry::new(),
    ));

    let first = {
        let reviewer = Arc::clone(&reviewer);
        tokio::spawn(async move { reviewer.review(&id(), &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(reviewer.in_flight().is_in_flight(&id()));

    let second = reviewer.review(&id(), &CancellationToken::new()).await;
    assert!(matches!(second, Err(ReviewError::AlreadyInFlight(_))));

    let first = first.await.unwrap().unwrap();
    assert!(first.decision.approvable, "{:?}", first.decision);
    assert_eq!(hosting.call_count(HostingOp::Approve), 1);
    assert!(!reviewer.in_flight().is_in_flight(&id()));
}
