//! Diff-shape recognisers: version-only dependency bumps and comment lines.

use std::sync::LazyLock;

use regex::Regex;

use super::profile::CommentStyle;
use super::{diff_lines, DiffLine};

static VERSION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"v?\d+(?:\.\d+){1,3}(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?")
        .expect("VERSION_TOKEN regex should compile")
});

static HASH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"h1:[A-Za-z0-9+/=]+|sha(?:1|256|384|512)-[A-Za-z0-9+/=]+|\b[0-9a-f]{40,128}\b")
        .expect("HASH_TOKEN regex should compile")
});

/// Whether a manifest or lock-file diff changes nothing but version numbers
/// and their content hashes.
///
/// Every changed line must carry a version or hash token, and once those
/// tokens are masked the removed lines and added lines must be the same
/// multiset. New or dropped dependencies therefore do not qualify.
pub fn is_dependency_update(patch: &str) -> bool {
    let mut removed = Vec::new();
    let mut added = Vec::new();

    for line in diff_lines(patch) {
        let (content, bucket) = match line {
            DiffLine::Added(content) => (content, &mut added),
            DiffLine::Removed(content) => (content, &mut removed),
            DiffLine::Context(_) => continue,
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        match mask_versions(content) {
            Some(masked) => bucket.push(masked),
            None => return false,
        }
    }

    removed.sort();
    added.sort();
    removed == added
}

/// `line` with hashes and version tokens masked, or `None` when it carries
/// neither.
fn mask_versions(line: &str) -> Option<String> {
    let hashed = HASH_TOKEN.replace_all(line, "<hash>");
    let spans: Vec<_> = VERSION_TOKEN
        .find_iter(&hashed)
        .filter(|m| !is_host(&hashed[..m.start()], &hashed[m.end()..], m.as_str()))
        .map(|m| m.range())
        .collect();
    if spans.is_empty() && hashed == line {
        return None;
    }

    let mut masked = String::with_capacity(hashed.len());
    let mut last = 0;
    for span in spans {
        masked.push_str(&hashed[last..span.start]);
        masked.push_str("<version>");
        last = span.end;
    }
    masked.push_str(&hashed[last..]);
    Some(masked)
}

/// Whether a numeric token is a network address rather than a version:
/// a URL authority, a `user@host` target, a `host:port` pair, or a dotted
/// quad used as a path or port prefix.
fn is_host(before: &str, after: &str, token: &str) -> bool {
    let next = after.chars().next();
    let port = after
        .strip_prefix(':')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit());
    let remote_path = after
        .strip_prefix(':')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| !c.is_whitespace() && c != '"' && c != '\'');
    let quad = !token.starts_with('v') && token.split('.').count() == 4;
    let mut tail = before.chars().rev();
    let inside_number = tail.next() == Some('.') && tail.next().is_some_and(|c| c.is_ascii_digit());

    before.ends_with("//")
        || inside_number
        || port
        || (before.ends_with('@') && (next == Some('/') || remote_path))
        || (quad && matches!(next, Some('/') | Some(':')))
}

/// Whether a trimmed line is nothing but a comment in `style`.
pub fn is_comment_line(line: &str, style: CommentStyle) -> bool {
    let line = line.trim();
    let c_like = || {
        line.starts_with("//")
            || line.starts_with("/*")
            || line.starts_with("*/")
            || line.starts_with("* ")
            || line == "*"
    };
    let hash = || line.starts_with('#') && !line.starts_with("#[") && !line.starts_with("#!");
    let markup = || line.starts_with("<!--") || line.starts_with("-->");
    let docstring = || line.starts_with("\"\"\"") || line.starts_with("'''");
    let batch = || {
        let lower = line.to_ascii_lowercase();
        lower == "rem" || lower.starts_with("rem ") || line.starts_with("::")
    };

    match style {
        CommentStyle::CLike => c_like(),
        CommentStyle::Hash => hash(),
        CommentStyle::CLikeAndHash => c_like() || hash(),
        CommentStyle::Python => hash() || docstring(),
        CommentStyle::Markup => markup(),
        CommentStyle::Batch => batch(),
        CommentStyle::NoComments => false,
        CommentStyle::Any => c_like() || hash() || markup() || docstring() || batch(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_mod_patch_bump() {
        let patch = "@@ -5,7 +5,7 @@ require (\n \
                     \tgithub.com/stretchr/testify v1.9.0\n\
                     -\tgithub.com/google/go-github/v68 v68.0.0\n\
                     +\tgithub.com/google/go-github/v68 v68.1.0\n \
                     )";
        assert!(is_dependency_update(patch));
    }

    #[test]
    fn test_go_sum_hash_lines() {
        let patch = "@@ -1,4 +1,4 @@\n\
                     -github.com/google/go-github/v68 v68.0.0 h1:ZW57zeNZiXTdQ16qrDiZ0k6XucrxZ2CGmoTvcCyQG6s=\n\
                     -github.com/google/go-github/v68 v68.0.0/go.mod h1:K9HAUBovM2sLwM408A18h+wd9vqdLOEqTUCbnRIcx68=\n\
                     +github.com/google/go-github/v68 v68.1.0 h1:Rs3AXsWjV1bBpyP8cNSXB6lH0pVMUBnEzV2fiM6VrzY=\n\
                     +github.com/google/go-github/v68 v68.1.0/go.mod h1:K9HAUBovM2sLwM408A18h+wd9vqdLOEqTUCbnRIcx68=";
        assert!(is_dependency_update(patch));
    }

    #[test]
    fn test_new_dependency_is_not_a_bump() {
        let patch = "+\tgithub.com/evil/backdoor v1.0.0";
        assert!(!is_dependency_update(patch));
    }

    #[test]
    fn test_renamed_dependency_is_not_a_bump() {
        let patch = "-\tgithub.com/a/lib v1.0.0\n+\tgithub.com/b/lib v1.0.1";
        assert!(!is_dependency_update(patch));
    }

    #[test]
    fn test_line_without_version_disqualifies() {
        let patch = "-\tfoo v1.0.0\n+\tfoo v1.0.1\n+replace foo => ../foo";
        assert!(!is_dependency_update(patch));
    }

    #[test]
    fn test_tarball_host_swap_is_not_a_bump() {
        let patch = "-    \"lodash\": \"http://10.0.0.1/lodash.tgz\",\n\
                     +    \"lodash\": \"http://203.0.113.9/lodash.tgz\",";
        assert!(!is_dependency_update(patch));
        assert!(!is_dependency_update(
            "-  resolved \"https://10.0.0.1:8443/lodash-4.17.20.tgz\"\n\
             +  resolved \"https://10.0.0.2:8443/lodash-4.17.21.tgz\""
        ));
        assert!(!is_dependency_update(
            "-\"dep\": \"git+ssh://git@10.0.0.1:org/dep.git\"\n\
             +\"dep\": \"git+ssh://git@10.6.6.6:org/dep.git\""
        ));
        assert!(!is_dependency_update(
            "-\"dep\": \"git@10.0.0.1:org/dep.git#v1.0.0\"\n\
             +\"dep\": \"git@10.6.6.6:org/dep.git#v1.0.1\""
        ));
    }

    #[test]
    fn test_version_in_tarball_path_is_a_bump() {
        let patch = "-  resolved \"https://registry.npmjs.org/lodash/-/lodash-4.17.20.tgz\"\n\
                     +  resolved \"https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz\"";
        assert!(is_dependency_update(patch));
    }

    #[test]
    fn test_yarn_lock_entry_bump() {
        let patch = "-lodash@4.17.20:\n+lodash@4.17.21:\n-  version \"4.17.20\"\n+  version \"4.17.21\"";
        assert!(is_dependency_update(patch));
    }

    #[test]
    fn test_package_json_caret_range() {
        let patch = "-    \"react\": \"^17.0.1\",\n+    \"react\": \"^17.0.3\",";
        assert!(is_dependency_update(patch));
    }

    #[test]
    fn test_comment_styles() {
        assert!(is_comment_line("  // fix typo", CommentStyle::CLike));
        assert!(is_comment_line(" * continuation", CommentStyle::CLike));
        assert!(!is_comment_line("*ptr = 5;", CommentStyle::CLike));
        assert!(!is_comment_line("# not in C", CommentStyle::CLike));
        assert!(is_comment_line("# note", CommentStyle::Hash));
        assert!(!is_comment_line("#[derive(Debug)]", CommentStyle::Any));
        assert!(is_comment_line("REM build", CommentStyle::Batch));
        assert!(!is_comment_line("remove_all()", CommentStyle::Any));
        assert!(!is_comment_line("\"x\": 1", CommentStyle::NoComments));
        assert!(is_comment_line("\"\"\"Docstring.", CommentStyle::Python));
    }
}
