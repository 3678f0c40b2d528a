//! Input side of the defense layer: screening and neutralising author text
//! before it is embedded in a prompt.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAX_TITLE_LENGTH: usize = 500;
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;
pub const MAX_PATCH_SIZE: usize = 50_000;
/// Highest tolerated share of non-ASCII characters.
pub const MAX_NON_ASCII_RATIO: f64 = 0.1;

pub const TRUNCATION_MARKER: &str = "\n... [truncated for security]";
pub const REDACTION_MARKER: &str = "[REDACTED-INJECTION]";
pub const OVERRIDE_MARKER: &str = "[REDACTED-OVERRIDE]";
pub const REPETITION_MARKER: &str = "[REDACTED-REPETITION]";
pub const SANITIZED_COMMENT: &str = "/* [comment sanitized for security] */";

const REPETITION_MIN_LEN: usize = 100;
const REPETITION_WINDOW: usize = 20;
const REPETITION_STRIDE: usize = 10;
const REPETITION_KEEP: usize = 200;

/// Kind of hostile input found in author text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    Overflow,
    PromptInjection,
    UnicodeAttack,
    RepetitionAttack,
    CodeInjection,
    SuspiciousPatch,
}

impl ThreatType {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatType::Overflow => "overflow",
            ThreatType::PromptInjection => "prompt_injection",
            ThreatType::UnicodeAttack => "unicode_attack",
            ThreatType::RepetitionAttack => "repetition_attack",
            ThreatType::CodeInjection => "code_injection",
            ThreatType::SuspiciousPatch => "suspicious_patch",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of sanitising one piece of author text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationResult {
    pub sanitized: String,
    pub threat_detected: bool,
    /// First threat found; `details` lists all of them.
    pub threat_type: Option<ThreatType>,
    pub details: Vec<String>,
    /// SHA-256 of the text as received.
    pub original_digest: String,
}

impl SanitizationResult {
    fn new(original: &str) -> Self {
        Self {
            sanitized: original.to_string(),
            threat_detected: false,
            threat_type: None,
            details: Vec::new(),
            original_digest: content_digest(original),
        }
    }

    fn flag(&mut self, threat: ThreatType, detail: impl Into<String>) {
        self.threat_detected = true;
        self.threat_type.get_or_insert(threat);
        self.details.push(detail.into());
    }
}

/// Hex SHA-256 of `text`.
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

struct Signature {
    regex: Regex,
    label: &'static str,
}

static INJECTION_SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    [
        (
            r"(?i)(ignore|disregard|forget).{0,20}(previous|above|prior).{0,20}(instruction|prompt|rule)",
            "Instruction override attempt",
        ),
        (
            r"(?i)new\s+(instruction|prompt|rule|task)s?:",
            "New instruction injection",
        ),
        (
            r"(?i)system\s+(prompt|message|instruction):",
            "System prompt injection",
        ),
        (
            r"(?i)\b(act|behave|pretend)\b.{0,20}\b(as|like|you're)\b",
            "Role manipulation attempt",
        ),
        (
            r"(?i)</?(system|assistant|user|instruction)>",
            "Chat markup injection",
        ),
        (
            r"(?i)###\s*(system|instruction|important)",
            "Markdown instruction injection",
        ),
        (r"(?i)approved:\s*true", "Direct approval injection"),
        (
            r"(?i)\b(always|must|should)\s+(approve|accept|merge)",
            "Forced approval attempt",
        ),
        (r"\x00|\x1b\[|\u{202E}|\u{FEFF}", "Control character injection"),
        (r"(?i)json.*approved.*true", "JSON injection attempt"),
    ]
    .into_iter()
    .map(|(pattern, label)| Signature {
        regex: Regex::new(pattern).expect("injection signature regex should compile"),
        label,
    })
    .collect()
});

static CODE_COMMENTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)//.*$",
        r"/\*[\s\S]*?\*/",
        r"(?m)#.*$",
        r"<!--[\s\S]*?-->",
        r#""""[\s\S]*?""""#,
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("comment regex should compile"))
    .collect()
});

const OVERRIDE_TOKENS: [&str; 6] = [
    "APPROVE_ALL",
    "BYPASS_SECURITY",
    "DISABLE_CHECKS",
    "ALWAYS_MERGE",
    "SKIP_VALIDATION",
    "IGNORE_ERRORS",
];

static OVERRIDE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(&OVERRIDE_TOKENS.join("|"))
        .case_insensitive(true)
        .build()
        .expect("override token regex should compile")
});

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Sanitise a change title.
pub fn sanitize_title(title: &str) -> SanitizationResult {
    sanitize_prose(title, MAX_TITLE_LENGTH, "title")
}

/// Sanitise a change description.
pub fn sanitize_description(description: &str) -> SanitizationResult {
    sanitize_prose(description, MAX_DESCRIPTION_LENGTH, "description")
}

/// Sanitise one file's patch text.
///
/// Only code comments are scanned for injection phrases: the code itself is
/// the subject of review and legitimately contains words like "approve".
pub fn sanitize_patch(patch: &str, path: &str) -> SanitizationResult {
    let mut result = SanitizationResult::new(patch);
    let mut text = patch.to_string();

    if text.len() > MAX_PATCH_SIZE {
        text = truncate_bytes(&text, MAX_PATCH_SIZE);
        text.push_str(TRUNCATION_MARKER);
        result.flag(
            ThreatType::Overflow,
            format!("Patch for {path} exceeds {MAX_PATCH_SIZE} bytes and was truncated"),
        );
    }

    let (neutralized, findings) = neutralize_comments(&text);
    if !findings.is_empty() {
        text = neutralized;
        for label in findings {
            result.flag(
                ThreatType::CodeInjection,
                format!("{label} in code comment of {path}"),
            );
        }
    }

    if OVERRIDE_TOKEN.is_match(&text) {
        let found: Vec<String> = OVERRIDE_TOKEN
            .find_iter(&text)
            .map(|m| m.as_str().to_ascii_uppercase())
            .collect();
        text = OVERRIDE_TOKEN.replace_all(&text, OVERRIDE_MARKER).into_owned();
        result.flag(
            ThreatType::SuspiciousPatch,
            format!("Override token in {path}: {}", found.join(", ")),
        );
    }

    screen_unicode_and_repetition(&mut text, &mut result, path, patch_repetition_threat);
    result.sanitized = strip_control_chars(&text);
    result
}

fn sanitize_prose(input: &str, max_chars: usize, field: &str) -> SanitizationResult {
    let mut result = SanitizationResult::new(input);
    let mut text = input.to_string();

    let length = text.chars().count();
    if length > max_chars {
        text = text.chars().take(max_chars).collect();
        text.push_str(TRUNCATION_MARKER);
        result.flag(
            ThreatType::Overflow,
            format!("{field} exceeds {max_chars} characters ({length}) and was truncated"),
        );
    }

    let (redacted, findings) = redact_injections(&text);
    if !findings.is_empty() {
        text = redacted;
        for label in findings {
            result.flag(ThreatType::PromptInjection, format!("{label} in {field}"));
        }
    }

    screen_unicode_and_repetition(&mut text, &mut result, field, repetition_threat);
    result.sanitized = strip_control_chars(&text);
    result
}

// ---------------------------------------------------------------------------
// Scanners
// ---------------------------------------------------------------------------

/// Labels of every injection signature present in `text`.
pub fn injection_findings(text: &str) -> Vec<&'static str> {
    INJECTION_SIGNATURES
        .iter()
        .filter(|sig| sig.regex.is_match(text))
        .map(|sig| sig.label)
        .collect()
}

fn redact_injections(text: &str) -> (String, Vec<&'static str>) {
    let findings = injection_findings(text);
    if findings.is_empty() {
        return (text.to_string(), findings);
    }
    let mut out = text.to_string();
    for sig in INJECTION_SIGNATURES.iter() {
        out = sig.regex.replace_all(&out, REDACTION_MARKER).into_owned();
    }
    // Structural tokens that could open a fake instruction block.
    out = out.replace("###", "---").replace("```", "'''");
    (out, findings)
}

fn neutralize_comments(text: &str) -> (String, Vec<&'static str>) {
    let mut findings = Vec::new();
    let mut out = text.to_string();
    for re in CODE_COMMENTS.iter() {
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let comment = &caps[0];
                let hits = injection_findings(comment);
                if hits.is_empty() {
                    comment.to_string()
                } else {
                    findings.extend(hits);
                    SANITIZED_COMMENT.to_string()
                }
            })
            .into_owned();
    }
    findings.sort_unstable();
    findings.dedup();
    (out, findings)
}

fn screen_unicode_and_repetition(
    text: &mut String,
    result: &mut SanitizationResult,
    field: &str,
    repetition: fn(&str) -> Option<usize>,
) {
    if let Some(reason) = unicode_threat(text) {
        *text = escape_non_ascii(text);
        result.flag(ThreatType::UnicodeAttack, format!("{reason} in {field}"));
    }
    if let Some(count) = repetition(text) {
        *text = format!("{}{REPETITION_MARKER}", truncate_bytes(text, REPETITION_KEEP));
        result.flag(
            ThreatType::RepetitionAttack,
            format!("Repeated pattern ({count} occurrences) in {field}"),
        );
    }
}

/// Description of the first suspicious Unicode property of `text`, if any.
pub fn unicode_threat(text: &str) -> Option<String> {
    let mut non_ascii = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        total += 1;
        match c {
            '\u{202E}' => return Some("Right-to-left override character".into()),
            '\u{FEFF}' => return Some("Zero-width no-break space".into()),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' => {
                return Some("Zero-width character".into())
            }
            '\u{E000}'..='\u{F8FF}' => return Some("Private use area character".into()),
            c if !c.is_ascii() => non_ascii += 1,
            _ => {}
        }
    }
    if total > 0 {
        let ratio = non_ascii as f64 / total as f64;
        if ratio > MAX_NON_ASCII_RATIO {
            return Some(format!("High non-ASCII ratio ({ratio:.2})"));
        }
    }
    None
}

/// Occurrence count of the most repeated window when it is far above what
/// the text's length would explain.
pub fn repetition_threat(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.len() < REPETITION_MIN_LEN {
        return None;
    }
    let mut counts: HashMap<&[u8], usize> = HashMap::new();
    let mut start = 0;
    while start + REPETITION_WINDOW <= bytes.len() {
        *counts.entry(&bytes[start..start + REPETITION_WINDOW]).or_insert(0) += 1;
        start += REPETITION_STRIDE;
    }
    let expected = bytes.len() / REPETITION_WINDOW / 3;
    counts
        .into_values()
        .max()
        .filter(|&count| count > expected && count > 2)
}

/// Repetition screen for diffs.
///
/// Lines of manifests and lock files share long prefixes, so the whole-text
/// window count would flag any large dependency bump. A diff is repetitive
/// when a single line is, or when one line makes up over a third of it.
pub fn patch_repetition_threat(patch: &str) -> Option<usize> {
    let mut lines: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;
    for line in patch.lines() {
        if let Some(count) = repetition_threat(line) {
            return Some(count);
        }
        let line = line.trim_end();
        if line.len() >= REPETITION_WINDOW {
            *lines.entry(line).or_insert(0) += 1;
        }
        total += 1;
    }
    lines
        .into_values()
        .max()
        .filter(|&count| count > total / 3 && count > 2)
}

/// Replace every non-ASCII character with a `\uXXXX` escape.
pub fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Drop control characters except newline and tab.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
