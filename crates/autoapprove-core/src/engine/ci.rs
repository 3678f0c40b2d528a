//! CI gate evaluation over commit statuses and check runs.

use crate::domain::{CheckRun, CheckRunStatus, CombinedStatus, StatusState};

/// Whether the legacy commit statuses allow approval.
///
/// Pending contexts never fail. Failures are tolerated when every failing
/// context is a review-required check, and signing failures are skipped for
/// bot authors when `ignore_signing` is set.
pub fn statuses_passing(status: &CombinedStatus, author_is_bot: bool, ignore_signing: bool) -> bool {
    if status.state == StatusState::Success {
        return true;
    }
    if status.statuses.is_empty() {
        return !status.state.is_failing();
    }

    let mut has_failures = false;
    let mut only_review_required = true;
    for s in &status.statuses {
        if !s.state.is_failing() {
            continue;
        }
        let context = s.context.to_lowercase();
        if ignore_signing && author_is_bot && context.contains("sign") {
            continue;
        }
        let description = s.description.to_lowercase();
        if !context.contains("review")
            && !description.contains("review required")
            && !description.contains("awaiting review")
        {
            only_review_required = false;
        }
        has_failures = true;
    }

    !has_failures || only_review_required
}

/// Whether every completed check run concluded success, neutral or skipped.
/// A completed run without a conclusion fails.
pub fn check_runs_passing(runs: &[CheckRun]) -> bool {
    runs.iter().all(|run| match (run.status, run.conclusion) {
        (CheckRunStatus::Completed, Some(conclusion)) => conclusion.is_passing(),
        (CheckRunStatus::Completed, None) => false,
        _ => true,
    })
}

/// Audit lines for failing and pending commit statuses.
pub fn status_details(status: &CombinedStatus) -> Vec<String> {
    let mut details = Vec::new();
    let mut pending = Vec::new();
    if status.statuses.is_empty() && status.state.is_failing() {
        details.push(format!("Combined status: {}", status.state.as_str()));
    }
    for s in &status.statuses {
        match s.state {
            StatusState::Failure | StatusState::Error if s.description.is_empty() => {
                details.push(format!("{}: {}", s.context, s.state.as_str()));
            }
            StatusState::Failure | StatusState::Error => {
                details.push(format!("{} ({})", s.context, s.description));
            }
            StatusState::Pending => pending.push(s.context.as_str()),
            StatusState::Success => {}
        }
    }
    if !pending.is_empty() {
        details.push(format!("Pending checks: {}", pending.join(", ")));
    }
    details
}

/// Audit lines for failing and pending check runs.
pub fn check_run_details(runs: &[CheckRun]) -> Vec<String> {
    let mut details = Vec::new();
    let mut pending = Vec::new();
    for run in runs {
        match (run.status, run.conclusion) {
            (CheckRunStatus::Queued | CheckRunStatus::InProgress, _) => pending.push(run.name.as_str()),
            (CheckRunStatus::Completed, Some(conclusion)) if !conclusion.is_passing() => {
                details.push(match &run.output_title {
                    Some(title) => format!("{}: {}", run.name, title),
                    None => format!("{} ({})", run.name, conclusion.as_str()),
                });
            }
            (CheckRunStatus::Completed, None) => {
                details.push(format!("{} (no conclusion)", run.name));
            }
            _ => {}
        }
    }
    if !pending.is_empty() {
        details.push(format!("Pending checks: {}", pending.join(", ")));
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckConclusion, CommitStatus};

    fn combined(state: StatusState, statuses: Vec<CommitStatus>) -> CombinedStatus {
        CombinedStatus { state, statuses }
    }

    #[test]
    fn test_pending_is_not_failure() {
        let status = combined(
            StatusState::Pending,
            vec![CommitStatus::new("build", StatusState::Pending)],
        );
        assert!(statuses_passing(&status, false, true));
        assert_eq!(status_details(&status), vec!["Pending checks: build"]);
    }

    #[test]
    fn test_review_required_failures_are_exempt() {
        let status = combined(
            StatusState::Failure,
            vec![
                CommitStatus::new("policy", StatusState::Failure).with_description("Review required"),
                CommitStatus::new("code-review/gate", StatusState::Error),
            ],
        );
        assert!(statuses_passing(&status, false, true));

        let mixed = combined(
            StatusState::Failure,
            vec![
                CommitStatus::new("policy", StatusState::Failure).with_description("Awaiting review"),
                CommitStatus::new("tests", StatusState::Failure),
            ],
        );
        assert!(!statuses_passing(&mixed, false, true));
        assert_eq!(status_details(&mixed), vec!["policy (Awaiting review)", "tests: failure"]);
    }

    #[test]
    fn test_signing_exemption_only_for_bots() {
        let status = combined(
            StatusState::Failure,
            vec![CommitStatus::new("commit-signing", StatusState::Failure)],
        );
        assert!(statuses_passing(&status, true, true));
        assert!(!statuses_passing(&status, false, true));
        assert!(!statuses_passing(&status, true, false));
    }

    #[test]
    fn test_check_runs() {
        let mut failing = CheckRun::completed("lint", CheckConclusion::Failure);
        let runs = vec![
            CheckRun::completed("build", CheckConclusion::Success),
            CheckRun::completed("docs", CheckConclusion::Skipped),
            CheckRun::in_progress("e2e"),
        ];
        assert!(check_runs_passing(&runs));

        failing.output_title = Some("3 warnings".into());
        let runs = vec![failing, CheckRun::in_progress("e2e")];
        assert!(!check_runs_passing(&runs));
        assert_eq!(check_run_details(&runs), vec!["lint: 3 warnings", "Pending checks: e2e"]);

        let timed_out = vec![CheckRun::completed("e2e", CheckConclusion::TimedOut)];
        assert_eq!(check_run_details(&timed_out), vec!["e2e (timed_out)"]);
    }

    #[test]
    fn test_failing_combined_state_without_contexts() {
        let failed = combined(StatusState::Failure, Vec::new());
        assert!(!statuses_passing(&failed, true, true));
        assert_eq!(status_details(&failed), vec!["Combined status: failure"]);
        assert!(!statuses_passing(&combined(StatusState::Error, Vec::new()), false, false));
        assert!(statuses_passing(&combined(StatusState::Pending, Vec::new()), false, false));
    }

    #[test]
    fn test_completed_run_without_conclusion_fails() {
        let mut run = CheckRun::completed("build", CheckConclusion::Success);
        run.conclusion = None;
        let runs = vec![run];
        assert!(!check_runs_passing(&runs));
        assert_eq!(check_run_details(&runs), vec!["build (no conclusion)"]);
    }
}
