//! Vote aggregation. Pure: no I/O, no clock.

use std::collections::BTreeMap;

use crate::domain::{AnalysisVerdict, Category, ConsensusVerdict, VetoFlags};
use crate::obs;

/// One model's parsed answer together with the bar it must clear to vote.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub model: String,
    pub required_confidence: f64,
    pub verdict: AnalysisVerdict,
}

impl ModelAnswer {
    pub fn qualifies(&self) -> bool {
        self.verdict.confidence >= self.required_confidence
    }
}

/// Aggregate `answers` (in priority order) into one verdict.
///
/// Fewer than `min_models` qualifying answers is never approved. A split
/// vote on `alters_behavior` is never approved. Any veto from any voter is
/// never approved.
pub fn aggregate(answers: &[ModelAnswer], min_models: usize) -> ConsensusVerdict {
    let mut model_results = BTreeMap::new();
    for answer in answers {
        obs::emit_model_result(
            &answer.model,
            answer.verdict.alters_behavior,
            answer.verdict.confidence,
        );
        model_results.insert(answer.model.clone(), answer.verdict.clone());
    }

    let confidence = if answers.is_empty() {
        0.0
    } else {
        answers.iter().map(|a| a.verdict.confidence).sum::<f64>() / answers.len() as f64
    };

    let voters: Vec<&ModelAnswer> = answers
        .iter()
        .filter(|a| {
            let qualifies = a.qualifies();
            if !qualifies {
                obs::emit_model_excluded(&a.model, a.verdict.confidence, a.required_confidence);
            }
            qualifies
        })
        .collect();

    let mut vetoes = VetoFlags::default();
    for voter in &voters {
        vetoes.absorb(&voter.verdict);
    }
    let category = plurality(&voters);
    let disagreements = disagreements(&voters);
    let alters_votes = voters.iter().filter(|v| v.verdict.alters_behavior).count();

    let (agreement, alters_behavior, approved, reason) = if voters.len() < min_models {
        (
            false,
            true,
            false,
            format!(
                "Insufficient high-confidence results: {}/{} models",
                voters.len(),
                min_models
            ),
        )
    } else if alters_votes == 0 {
        if vetoes.any() {
            (
                true,
                false,
                false,
                format!("Vetoed by at least one model: {}", vetoes.names().join(", ")),
            )
        } else {
            (
                true,
                false,
                true,
                "All models agree: change does not alter behavior".to_string(),
            )
        }
    } else if alters_votes == voters.len() {
        (
            true,
            true,
            false,
            "All models agree: change alters behavior".to_string(),
        )
    } else {
        (
            false,
            true,
            false,
            format!(
                "Models disagree: {}/{} say alters behavior",
                alters_votes,
                voters.len()
            ),
        )
    };

    obs::emit_consensus_finished(agreement, approved, voters.len(), answers.len());

    ConsensusVerdict {
        alters_behavior,
        agreement,
        approved,
        confidence,
        vetoes,
        category,
        reason,
        qualifying_models: voters.len(),
        models_used: answers.len(),
        disagreements,
        model_results,
    }
}

/// Most common category among voters; ties go to the higher-priority model.
fn plurality(voters: &[&ModelAnswer]) -> Option<Category> {
    let mut counts: Vec<(Category, usize)> = Vec::new();
    for category in voters.iter().filter_map(|v| v.verdict.category) {
        match counts.iter_mut().find(|(c, _)| *c == category) {
            Some((_, n)) => *n += 1,
            None => counts.push((category, 1)),
        }
    }
    let mut best: Option<(Category, usize)> = None;
    for (category, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((category, n));
        }
    }
    best.map(|(c, _)| c)
}

fn disagreements(voters: &[&ModelAnswer]) -> Vec<String> {
    let dimensions: [(&str, fn(&AnalysisVerdict) -> bool); 8] = [
        ("alters_behavior", |v| v.alters_behavior),
        ("possibly_malicious", |v| v.possibly_malicious),
        ("vandalism", |v| v.vandalism),
        ("insecure_change", |v| v.insecure_change),
        ("major_version_bump", |v| v.major_version_bump),
        ("risky", |v| v.risky),
        ("superfluous", |v| v.superfluous),
        ("non_trivial", |v| v.non_trivial),
    ];

    let mut notes = Vec::new();
    for (name, flag) in dimensions {
        let (flagged, clear): (Vec<&&ModelAnswer>, Vec<&&ModelAnswer>) =
            voters.iter().partition(|v| flag(&v.verdict));
        if !flagged.is_empty() && !clear.is_empty() {
            notes.push(format!(
                "{name}: flagged by {} vs not by {}",
                model_names(&flagged),
                model_names(&clear)
            ));
        }
    }

    let mut categories: Vec<Option<Category>> = voters.iter().map(|v| v.verdict.category).collect();
    categories.sort();
    categories.dedup();
    if categories.len() > 1 {
        notes.push(format!("category: {} different categories", categories.len()));
    }
    notes
}

fn model_names(set: &[&&ModelAnswer]) -> String {
    set.iter().map(|a| a.model.as_str()).collect::<Vec<_>>().join(", ")
}
