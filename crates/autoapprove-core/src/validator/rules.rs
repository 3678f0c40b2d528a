//! Static rule tables: forbidden character sets and dangerous-pattern families.

use std::sync::LazyLock;

use regex::Regex;

/// Every shell control character with the risk it carries.
pub const SHELL_CONTROL_CHARS: [(char, &str); 17] = [
    ('\'', "single quote (command injection risk)"),
    ('"', "double quote (command injection risk)"),
    ('`', "backtick (command substitution)"),
    ('$', "dollar sign (variable expansion)"),
    ('|', "pipe (command chaining)"),
    ('&', "ampersand (background execution)"),
    (';', "semicolon (command separator)"),
    ('>', "redirect output"),
    ('<', "redirect input"),
    ('\\', "escape character"),
    ('\n', "newline (command injection)"),
    ('\r', "carriage return (command injection)"),
    ('*', "glob wildcard"),
    ('?', "glob single char"),
    ('{', "brace expansion (open)"),
    ('}', "brace expansion (close)"),
    ('~', "home directory expansion"),
];

/// Shell scripts, workflows, build files: nothing a shell would interpret.
pub const ALL_SHELL_CHARS: &[char] = &[
    '\'', '"', '`', '$', '|', '&', ';', '>', '<', '\\', '\n', '\r', '*', '?', '{', '}', '~',
];

/// Prose and inert metadata.
pub const MINIMAL_CHARS: &[char] = &['`', '$', '\r'];

/// Structured data files. Quotes and braces are part of the syntax.
pub const CONFIG_CHARS: &[char] = &['`', '|', '&', ';', '>', '<', '\r'];

/// Interpreted scripting languages.
pub const SCRIPT_CHARS: &[char] = &['`', '$', ';', '|', '&', '>', '<', '\r'];

/// Compiled languages and JavaScript: operators use most shell characters.
pub const CODE_CHARS: &[char] = &['`', '$', '\r'];

pub fn describe_char(c: char) -> &'static str {
    SHELL_CONTROL_CHARS
        .iter()
        .find(|(ch, _)| *ch == c)
        .map(|(_, desc)| *desc)
        .unwrap_or("control character")
}

/// Call names that execute code or spawn processes, matched case-insensitively
/// as substrings.
pub const DANGEROUS_CALLS: [&str; 11] = [
    "eval",
    "exec",
    "system",
    "popen",
    "subprocess",
    "os.system",
    "runtime.exec",
    "process.start",
    "shell_exec",
    "passthru",
    "proc_open",
];

/// Command-substitution syntax across shells and template languages.
pub static COMMAND_SUBSTITUTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\$\([^)]+\)",
        r"`[^`]+`",
        r"\$\{[^}]+\}",
        r"%\([^)]+\)s",
        r#"f["'].*\{.*\}"#,
    ])
});

/// Workflow expressions that interpolate attacker-controlled event data.
pub static UNTRUSTED_EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*(github\.event|inputs|issue|pull_request)\.")
        .expect("UNTRUSTED_EXPRESSION regex should compile")
});

/// File formats with their own dangerous-pattern list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternFamily {
    Yaml,
    Json,
    Dockerfile,
    Makefile,
    Workflow,
}

static YAML: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?m)^\s*-?\s*(script|run|command|cmd|exec|shell):\s*(.+)",
        r"\$\{\{.*\}\}",
        r"\$\(.*\)",
        r"&&|\|\|",
        r"(?i)\b(curl|wget|bash|sh|eval|exec)\b",
    ])
});

static JSON: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#""(script|command|cmd|exec|shell)"\s*:\s*"([^"]*[|;&<>`][^"]*)""#,
        r"\$\(.*\)",
    ])
});

static DOCKERFILE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)^\s*RUN\s+.*[|;&]",
        r"(?i)^\s*CMD\s+.*[|;&]",
        r"(?i)^\s*ENTRYPOINT\s+.*[|;&]",
        r"curl.*\|\s*(bash|sh)",
    ])
});

static MAKEFILE: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\$\(shell.*\)", r"@.*[|;&]"]));

static WORKFLOW: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"run:\s*\|",
        r"\$\{\{.*github\.event\..*\}\}",
        r"\$\{\{.*inputs\..*\}\}",
        r"\$\{\{.*issue\.title.*\}\}",
        r"\$\{\{.*issue\.body.*\}\}",
        r"\$\{\{.*pull_request\.title.*\}\}",
    ])
});

impl PatternFamily {
    pub fn patterns(self) -> &'static [Regex] {
        match self {
            PatternFamily::Yaml => &YAML,
            PatternFamily::Json => &JSON,
            PatternFamily::Dockerfile => &DOCKERFILE,
            PatternFamily::Makefile => &MAKEFILE,
            PatternFamily::Workflow => &WORKFLOW,
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("dangerous pattern regex should compile"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_family_compiles_fully() {
        assert_eq!(PatternFamily::Yaml.patterns().len(), 5);
        assert_eq!(PatternFamily::Json.patterns().len(), 2);
        assert_eq!(PatternFamily::Dockerfile.patterns().len(), 4);
        assert_eq!(PatternFamily::Makefile.patterns().len(), 2);
        assert_eq!(PatternFamily::Workflow.patterns().len(), 6);
        assert_eq!(COMMAND_SUBSTITUTION.len(), 5);
    }

    #[test]
    fn test_untrusted_expression_matches_event_data() {
        assert!(UNTRUSTED_EXPRESSION.is_match("echo ${{ github.event.issue.title }}"));
        assert!(UNTRUSTED_EXPRESSION.is_match("x: ${{inputs.name}}"));
        assert!(!UNTRUSTED_EXPRESSION.is_match("x: ${{ secrets.TOKEN }}"));
    }

    #[test]
    fn test_describe_char() {
        assert_eq!(describe_char('`'), "backtick (command substitution)");
        assert_eq!(describe_char('\r'), "carriage return (command injection)");
    }

    #[test]
    fn test_yaml_shell_words_need_word_boundary() {
        let yaml = PatternFamily::Yaml.patterns();
        assert!(yaml.iter().any(|re| re.is_match("  - curl example.com")));
        assert!(!yaml.iter().any(|re| re.is_match("shared: true")));
    }
}
