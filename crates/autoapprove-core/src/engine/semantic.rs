//! Whole-change semantic gate: maps an [`AnalysisVerdict`] to a rejection.

use crate::domain::AnalysisVerdict;

/// First flagged dimension, in severity order, as a rejection reason.
///
/// `non_trivial` is waived for dependency bots. A missing category rejects
/// even when every flag is clear.
pub fn rejection(verdict: &AnalysisVerdict, dependency_bot: bool) -> Option<&'static str> {
    let checks = [
        (verdict.possibly_malicious, "Changes appear potentially malicious"),
        (verdict.vandalism, "Changes appear to be vandalism"),
        (verdict.insecure_change, "Changes may introduce security vulnerabilities"),
        (
            verdict.major_version_bump,
            "Major version bump detected - requires manual review",
        ),
        (verdict.risky, "Changes are high risk"),
        (
            verdict.title_desc_mismatch,
            "PR title/description does not match the changes",
        ),
        (verdict.alters_behavior, "Changes alter application behavior"),
        (verdict.not_improvement, "Changes do not appear to be an improvement"),
        (verdict.non_trivial && !dependency_bot, "Changes are non-trivial"),
        (verdict.confusing, "Changes may introduce confusion"),
        (verdict.superfluous, "Changes appear superfluous"),
        (verdict.category.is_none(), "Cannot determine change category"),
    ];
    checks
        .into_iter()
        .find_map(|(flagged, reason)| flagged.then_some(reason))
}

/// One audit line summarising what the model flagged.
pub fn summary(verdict: &AnalysisVerdict, dependency_bot: bool) -> String {
    let issues: Vec<&str> = verdict
        .flagged_dimensions()
        .into_iter()
        .filter(|d| !(dependency_bot && *d == "non-trivial"))
        .collect();
    let mut out = match issues.len() {
        0 => "AI found no issues with this change".to_string(),
        1 => format!("AI flagged: {}", issues[0]),
        n => format!("AI flagged {n} issues: {}", issues.join(", ")),
    };
    if let Some(category) = verdict.category {
        out.push_str(&format!(" ({category} change)"));
    }
    if !verdict.reason.is_empty() {
        out.push_str(&format!(". Analysis: {}", verdict.reason));
    }
    out
}
