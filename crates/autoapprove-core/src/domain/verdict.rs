//! Structured outputs of AI analysis: one model ([`AnalysisVerdict`]) or an
//! aggregate over several ([`ConsensusVerdict`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of change categories a model may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Typo,
    Comment,
    Markdown,
    Lint,
    Dependency,
    Config,
    Refactor,
    Bugfix,
    Feature,
    Other,
    /// Only assigned locally when hostile input short-circuits analysis.
    Suspicious,
}

impl Category {
    /// Values a model is permitted to report.
    pub const REPORTABLE: [Category; 10] = [
        Category::Typo,
        Category::Comment,
        Category::Markdown,
        Category::Lint,
        Category::Dependency,
        Category::Config,
        Category::Refactor,
        Category::Bugfix,
        Category::Feature,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Typo => "typo",
            Category::Comment => "comment",
            Category::Markdown => "markdown",
            Category::Lint => "lint",
            Category::Dependency => "dependency",
            Category::Config => "config",
            Category::Refactor => "refactor",
            Category::Bugfix => "bugfix",
            Category::Feature => "feature",
            Category::Other => "other",
            Category::Suspicious => "suspicious",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts only [`Category::REPORTABLE`] values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::REPORTABLE
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("invalid category: {s}"))
    }
}

/// Output of one AI analysis call.
///
/// There is deliberately no `Default`: every construction site must choose
/// its values, and the error paths use [`AnalysisVerdict::fail_closed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVerdict {
    pub alters_behavior: bool,
    pub not_improvement: bool,
    pub non_trivial: bool,
    pub risky: bool,
    pub insecure_change: bool,
    pub possibly_malicious: bool,
    pub superfluous: bool,
    pub vandalism: bool,
    pub confusing: bool,
    pub title_desc_mismatch: bool,
    pub major_version_bump: bool,
    /// `None` when the model's answer could not be trusted.
    pub category: Option<Category>,
    pub reason: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

impl AnalysisVerdict {
    /// Verdict for unparseable or invalid model output.
    ///
    /// Every "assume the worst" dimension is set so the semantic gate rejects,
    /// while the accusatory ones (insecure, malicious, vandalism) stay unset so
    /// the audit trail does not accuse the author of something nobody saw.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            alters_behavior: true,
            not_improvement: true,
            non_trivial: true,
            risky: true,
            insecure_change: false,
            possibly_malicious: false,
            superfluous: true,
            vandalism: false,
            confusing: true,
            title_desc_mismatch: true,
            major_version_bump: true,
            category: None,
            reason: reason.into(),
            confidence: 0.0,
        }
    }

    /// Verdict used when hostile input was detected before any model call.
    pub fn threat_detected() -> Self {
        Self {
            alters_behavior: true,
            not_improvement: false,
            non_trivial: false,
            risky: true,
            insecure_change: false,
            possibly_malicious: true,
            superfluous: false,
            vandalism: false,
            confusing: false,
            title_desc_mismatch: false,
            major_version_bump: false,
            category: Some(Category::Suspicious),
            reason: "Security threat detected in PR content".to_string(),
            confidence: 1.0,
        }
    }

    /// A verdict with every dimension clear. Used by tests and fakes.
    pub fn benign(category: Category, reason: impl Into<String>) -> Self {
        Self {
            alters_behavior: false,
            not_improvement: false,
            non_trivial: false,
            risky: false,
            insecure_change: false,
            possibly_malicious: false,
            superfluous: false,
            vandalism: false,
            confusing: false,
            title_desc_mismatch: false,
            major_version_bump: false,
            category: Some(category),
            reason: reason.into(),
            confidence: 1.0,
        }
    }

    /// Names of every dimension the verdict flags, in a stable order.
    pub fn flagged_dimensions(&self) -> Vec<&'static str> {
        let dims = [
            (self.possibly_malicious, "possibly malicious"),
            (self.vandalism, "vandalism"),
            (self.insecure_change, "insecure"),
            (self.major_version_bump, "major version bump"),
            (self.risky, "risky"),
            (self.title_desc_mismatch, "title/description mismatch"),
            (self.alters_behavior, "alters behavior"),
            (self.not_improvement, "not an improvement"),
            (self.non_trivial, "non-trivial"),
            (self.confusing, "confusing"),
            (self.superfluous, "superfluous"),
        ];
        dims.into_iter()
            .filter_map(|(flag, name)| flag.then_some(name))
            .collect()
    }
}

/// Dimensions where a single qualifying model's flag rejects the change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoFlags {
    pub possibly_malicious: bool,
    pub vandalism: bool,
    pub insecure_change: bool,
    pub major_version_bump: bool,
    pub risky: bool,
    pub superfluous: bool,
    pub non_trivial: bool,
}

impl VetoFlags {
    /// OR `verdict`'s veto dimensions into `self`.
    pub fn absorb(&mut self, verdict: &AnalysisVerdict) {
        self.possibly_malicious |= verdict.possibly_malicious;
        self.vandalism |= verdict.vandalism;
        self.insecure_change |= verdict.insecure_change;
        self.major_version_bump |= verdict.major_version_bump;
        self.risky |= verdict.risky;
        self.superfluous |= verdict.superfluous;
        self.non_trivial |= verdict.non_trivial;
    }

    pub fn any(&self) -> bool {
        !self.names().is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.possibly_malicious, "possibly malicious"),
            (self.vandalism, "vandalism detected"),
            (self.insecure_change, "security risk"),
            (self.major_version_bump, "major version bump"),
            (self.risky, "high risk change"),
            (self.superfluous, "superfluous change"),
            (self.non_trivial, "non-trivial change"),
        ]
        .into_iter()
        .filter_map(|(flag, name)| flag.then_some(name))
        .collect()
    }
}

/// Aggregate of several models' verdicts on the same prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVerdict {
    pub alters_behavior: bool,
    /// Qualifying models unanimously agreed on `alters_behavior`.
    pub agreement: bool,
    pub approved: bool,
    /// Mean confidence over every model that answered.
    pub confidence: f64,
    pub vetoes: VetoFlags,
    pub category: Option<Category>,
    pub reason: String,
    pub qualifying_models: usize,
    pub models_used: usize,
    /// Human-readable notes on which models dissented and why.
    pub disagreements: Vec<String>,
    /// Raw verdict per model identifier, including non-qualifying ones.
    pub model_results: BTreeMap<String, AnalysisVerdict>,
}
