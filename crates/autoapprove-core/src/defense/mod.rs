//! Input/Output Defense
//!
//! Everything the change author wrote is hostile input to the language
//! model, and everything the model writes back is hostile input to the
//! decision pipeline.
//!
//! - [`sanitize`]: `sanitize_title()`, `sanitize_description()`, `sanitize_patch()`
//! - [`response`]: `validate_response()`, `parse_verdict()`
//!
//! [`sanitize_context`] and [`sanitize_files`] apply the input side to a whole change and
//! [`detect_threats`] decides whether anything hostile survived.

pub mod response;
pub mod sanitize;

pub use response::{parse_verdict, validate_response, ResponseError, ValidatedResponse};
pub use sanitize::{
    content_digest, sanitize_description, sanitize_patch, sanitize_title, SanitizationResult,
    ThreatType,
};

use crate::domain::{ChangeRequest, FileDelta};

/// Change metadata after sanitisation.
#[derive(Debug, Clone)]
pub struct SanitizedContext {
    pub title: SanitizationResult,
    pub description: SanitizationResult,
}

/// One file after sanitisation. `patch` is `None` when the host sent none.
#[derive(Debug, Clone)]
pub struct SanitizedFile {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<SanitizationResult>,
}

pub fn sanitize_context(change: &ChangeRequest) -> SanitizedContext {
    SanitizedContext {
        title: sanitize_title(&change.title),
        description: sanitize_description(&change.description),
    }
}

pub fn sanitize_files(files: &[FileDelta]) -> Vec<SanitizedFile> {
    files
        .iter()
        .map(|f| SanitizedFile {
            path: f.path.clone(),
            additions: f.additions,
            deletions: f.deletions,
            patch: f.patch.as_deref().map(|p| sanitize_patch(p, &f.path)),
        })
        .collect()
}

/// Every threat note across a sanitised change, in input order.
pub fn threat_details(context: &SanitizedContext, files: &[SanitizedFile]) -> Vec<String> {
    std::iter::once(&context.title)
        .chain(std::iter::once(&context.description))
        .chain(files.iter().filter_map(|f| f.patch.as_ref()))
        .flat_map(|r| r.details.iter().cloned())
        .collect()
}

/// Second pass over sanitised input.
///
/// True if any field was flagged on the way in, or if re-sanitising the
/// already sanitised text still finds something. Neutralised text keeps its
/// flag: a change that tried an injection is not trusted just because the
/// injection was redacted.
pub fn detect_threats(context: &SanitizedContext, files: &[SanitizedFile]) -> bool {
    if context.title.threat_detected || context.description.threat_detected {
        return true;
    }
    if sanitize_title(&context.title.sanitized).threat_detected
        || sanitize_description(&context.description.sanitized).threat_detected
    {
        return true;
    }
    files.iter().any(|f| match &f.patch {
        Some(p) => p.threat_detected || sanitize_patch(&p.sanitized, &f.path).threat_detected,
        None => false,
    })
}
