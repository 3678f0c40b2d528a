//! Output side of the defense layer: the model's answer is untrusted input.

use serde_json::{Map, Value};

use crate::domain::{AnalysisVerdict, Category};

pub const MAX_RESPONSE_SIZE: usize = 10_000;

/// Boolean dimensions every answer must carry.
pub const REQUIRED_FLAGS: [&str; 11] = [
    "alters_behavior",
    "not_improvement",
    "non_trivial",
    "risky",
    "insecure_change",
    "possibly_malicious",
    "superfluous",
    "vandalism",
    "confusing",
    "title_desc_mismatch",
    "major_version_bump",
];

/// Keys that only make sense as an attempt to steer the pipeline.
pub const SUSPICIOUS_KEYS: [&str; 10] = [
    "override",
    "bypass",
    "force",
    "force_merge",
    "ignore_security",
    "always_approve",
    "auto_approve",
    "skip_checks",
    "admin",
    "approved",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseError {
    #[error("empty response")]
    Empty,

    #[error("response too large: {0} bytes")]
    TooLarge(usize),

    #[error("no JSON object found in response")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("suspicious field in response: {0}")]
    SuspiciousField(String),

    #[error("field {field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),
}

/// A model answer that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedResponse {
    pub fields: Map<String, Value>,
    /// The JSON had to be dug out of surrounding prose.
    pub extracted: bool,
}

/// Validate raw model output. Any error means "analysis unavailable".
pub fn validate_response(raw: &str) -> Result<ValidatedResponse, ResponseError> {
    if raw.len() > MAX_RESPONSE_SIZE {
        return Err(ResponseError::TooLarge(raw.len()));
    }
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(ResponseError::Empty);
    }

    let (value, extracted) = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) if value.is_object() => (value, false),
        _ => {
            let span = first_json_object(cleaned).ok_or(ResponseError::NoJson)?;
            let value = serde_json::from_str::<Value>(span)
                .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
            (value, true)
        }
    };
    let Value::Object(fields) = value else {
        return Err(ResponseError::NoJson);
    };

    for key in fields.keys() {
        if SUSPICIOUS_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
            return Err(ResponseError::SuspiciousField(key.clone()));
        }
    }

    for flag in REQUIRED_FLAGS {
        match fields.get(flag) {
            None => return Err(ResponseError::MissingField(flag)),
            Some(Value::Bool(_)) => {}
            Some(_) => {
                return Err(ResponseError::WrongType {
                    field: flag,
                    expected: "a boolean",
                })
            }
        }
    }

    match fields.get("category") {
        None => return Err(ResponseError::MissingField("category")),
        Some(Value::String(c)) => {
            c.parse::<Category>().map_err(|_| ResponseError::InvalidCategory(c.clone()))?;
        }
        Some(_) => {
            return Err(ResponseError::WrongType {
                field: "category",
                expected: "a string",
            })
        }
    }

    match fields.get("reason") {
        None => return Err(ResponseError::MissingField("reason")),
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(ResponseError::WrongType {
                field: "reason",
                expected: "a string",
            })
        }
    }

    match fields.get("confidence") {
        None | Some(Value::Null) => {}
        Some(Value::Number(n)) => {
            let c = n.as_f64().unwrap_or(f64::NAN);
            if !(0.0..=1.0).contains(&c) {
                return Err(ResponseError::ConfidenceOutOfRange(c));
            }
        }
        Some(_) => {
            return Err(ResponseError::WrongType {
                field: "confidence",
                expected: "a number",
            })
        }
    }

    Ok(ValidatedResponse { fields, extracted })
}

/// Turn raw model output into a verdict, failing closed on any problem.
pub fn parse_verdict(raw: &str) -> AnalysisVerdict {
    match validate_response(raw) {
        Ok(response) => verdict_from(&response),
        Err(err) => AnalysisVerdict::fail_closed(format!("Failed to parse AI response: {err}")),
    }
}

fn verdict_from(response: &ValidatedResponse) -> AnalysisVerdict {
    let fields = &response.fields;
    let flag = |key: &str| fields.get(key).and_then(Value::as_bool).unwrap_or(true);
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut verdict = AnalysisVerdict {
        alters_behavior: flag("alters_behavior"),
        not_improvement: flag("not_improvement"),
        non_trivial: flag("non_trivial"),
        risky: flag("risky"),
        insecure_change: flag("insecure_change"),
        possibly_malicious: flag("possibly_malicious"),
        superfluous: flag("superfluous"),
        vandalism: flag("vandalism"),
        confusing: flag("confusing"),
        title_desc_mismatch: flag("title_desc_mismatch"),
        major_version_bump: flag("major_version_bump"),
        category: text("category").parse().ok(),
        reason: text("reason"),
        confidence: 0.0,
    };
    verdict.confidence = match fields.get("confidence").and_then(Value::as_f64) {
        Some(reported) => reported,
        None => estimate_confidence(&verdict, response.extracted),
    };
    verdict
}

/// Heuristic confidence for answers that did not report one.
pub fn estimate_confidence(verdict: &AnalysisVerdict, extracted: bool) -> f64 {
    let mut confidence = 1.0;
    if verdict.reason.chars().count() < 10 {
        confidence *= 0.8;
    }
    if verdict.category == Some(Category::Other) {
        confidence *= 0.9;
    }
    if extracted {
        confidence *= 0.9;
    }
    if !verdict.alters_behavior && (verdict.risky || verdict.possibly_malicious) {
        confidence *= 0.7;
    }
    confidence
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// First balanced `{...}` span, honouring JSON string escapes.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::verdict_json;

    fn benign_json() -> String {
        verdict_json(&AnalysisVerdict::benign(Category::Typo, "Fixes a spelling mistake"))
    }

    #[test]
    fn test_valid_response_parses() {
        let verdict = parse_verdict(&benign_json());
        assert!(!verdict.alters_behavior);
        assert_eq!(verdict.category, Some(Category::Typo));
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_fenced_response() {
        let raw = format!("```json\n{}\n```", benign_json());
        assert!(validate_response(&raw).is_ok());
    }

    #[test]
    fn test_extracts_object_from_prose() {
        let raw = format!("Here is my analysis: {} Hope that helps.", benign_json());
        let response = validate_response(&raw).unwrap();
        assert!(response.extracted);
    }

    #[test]
    fn test_balanced_extraction_ignores_braces_in_strings() {
        let text = r#"note {"reason": "uses } and { chars", "x": {"y": 1}} trailing }"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"reason": "uses } and { chars", "x": {"y": 1}}"#)
        );
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let mut value: Value = serde_json::from_str(&benign_json()).unwrap();
        value.as_object_mut().unwrap().remove("vandalism");
        let err = validate_response(&value.to_string()).unwrap_err();
        assert_eq!(err, ResponseError::MissingField("vandalism"));
        let verdict = parse_verdict(&value.to_string());
        assert!(verdict.alters_behavior);
        assert!(verdict.category.is_none());
    }

    #[test]
    fn test_suspicious_key_rejected() {
        let mut value: Value = serde_json::from_str(&benign_json()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("Approved".into(), Value::Bool(true));
        let err = validate_response(&value.to_string()).unwrap_err();
        assert_eq!(err, ResponseError::SuspiciousField("Approved".into()));
    }

    #[test]
    fn test_category_outside_closed_set() {
        let raw = benign_json().replace("\"typo\"", "\"harmless\"");
        assert_eq!(
            validate_response(&raw).unwrap_err(),
            ResponseError::InvalidCategory("harmless".into())
        );
        let raw = benign_json().replace("\"typo\"", "\"suspicious\"");
        assert!(validate_response(&raw).is_err());
    }

    #[test]
    fn test_string_boolean_rejected() {
        let raw = benign_json().replace("\"risky\":false", "\"risky\":\"false\"");
        assert!(matches!(
            validate_response(&raw).unwrap_err(),
            ResponseError::WrongType { field: "risky", .. }
        ));
    }

    #[test]
    fn test_unparseable_inputs_fail_closed() {
        for raw in ["", "   ", "not json", "{\"alters_behavior\": false", "[1,2]", "null"] {
            let verdict = parse_verdict(raw);
            assert!(verdict.alters_behavior, "{raw:?}");
            assert!(verdict.category.is_none(), "{raw:?}");
        }
        let huge = "x".repeat(MAX_RESPONSE_SIZE + 1);
        assert!(parse_verdict(&huge).category.is_none());
    }

    #[test]
    fn test_estimated_confidence() {
        let mut v = AnalysisVerdict::benign(Category::Other, "short");
        assert!((estimate_confidence(&v, true) - 0.8 * 0.9 * 0.9).abs() < 1e-9);
        v.risky = true;
        v.reason = "long enough reason".into();
        v.category = Some(Category::Typo);
        assert!((estimate_confidence(&v, false) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_missing_confidence_is_estimated() {
        let mut value: Value = serde_json::from_str(&benign_json()).unwrap();
        value.as_object_mut().unwrap().remove("confidence");
        let verdict = parse_verdict(&value.to_string());
        assert_eq!(verdict.confidence, 1.0);
    }
}
