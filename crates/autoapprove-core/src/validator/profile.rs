//! Path classification: which rules apply to a file, and which files are
//! never eligible for automatic approval.

use serde::Serialize;

use super::rules::{
    PatternFamily, ALL_SHELL_CHARS, CODE_CHARS, CONFIG_CHARS, MINIMAL_CHARS, SCRIPT_CHARS,
};

/// Broad class of a file for validation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    /// Executable source. Unknown file types land here too.
    Code,
    Config,
    /// Human-facing prose.
    Markdown,
    /// Repository metadata with no runtime effect (`.gitignore` and friends).
    Inert,
}

/// Comment syntax recognised for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStyle {
    /// `//`, `/* */`, leading `*` continuation lines.
    CLike,
    /// `#` line comments.
    Hash,
    /// Both of the above.
    CLikeAndHash,
    /// `#` plus Python docstring delimiters.
    Python,
    /// `<!-- -->`.
    Markup,
    /// `rem` / `::`.
    Batch,
    /// Formats without comments.
    NoComments,
    /// Every syntax above; used when the language is unknown.
    Any,
}

/// Validation profile derived from a path. Pure function of the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTypeProfile {
    pub class: FileClass,
    pub allow_apostrophes: bool,
    pub max_line_length: usize,
    #[serde(skip)]
    pub forbidden: &'static [char],
    #[serde(skip)]
    pub patterns: Option<PatternFamily>,
    pub comments: CommentStyle,
    /// Version-only diffs to this file may bypass the behaviour check.
    pub dependency_manifest: bool,
}

impl FileTypeProfile {
    pub fn is_code(&self) -> bool {
        self.class == FileClass::Code
    }

    pub fn is_config(&self) -> bool {
        self.class == FileClass::Config
    }

    pub fn is_markdown(&self) -> bool {
        self.class == FileClass::Markdown
    }

    pub fn forbids(&self, c: char) -> bool {
        if c == '\'' && self.allow_apostrophes {
            return false;
        }
        self.forbidden.contains(&c)
    }

    fn new(class: FileClass, max_line_length: usize, forbidden: &'static [char]) -> Self {
        Self {
            class,
            allow_apostrophes: false,
            max_line_length,
            forbidden,
            patterns: None,
            comments: CommentStyle::Any,
            dependency_manifest: false,
        }
    }

    fn with_comments(mut self, style: CommentStyle) -> Self {
        self.comments = style;
        self
    }

    fn with_patterns(mut self, family: Option<PatternFamily>) -> Self {
        self.patterns = family;
        self
    }

    fn as_manifest(mut self) -> Self {
        self.dependency_manifest = true;
        self
    }
}

const INERT_FILES: [&str; 3] = [".gitignore", ".editorconfig", ".gitattributes"];

const DEPENDENCY_MANIFESTS: [&str; 8] = [
    "package.json",
    "cargo.toml",
    "requirements.txt",
    "composer.json",
    "pyproject.toml",
    "gemfile",
    "go.mod",
    "pipfile",
];

const LOCK_FILES: [&str; 9] = [
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.lock",
    "gemfile.lock",
    "poetry.lock",
    "composer.lock",
    "pipfile.lock",
    "go.sum",
];

const BUILD_FILES: [&str; 6] = [
    "makefile",
    "pom.xml",
    "build.gradle",
    ".dockerignore",
    "docker-compose.yml",
    "docker-compose.yaml",
];

/// Lower-cased basename and extension of a path.
fn split_path(path: &str) -> (String, String) {
    let lower = path.to_ascii_lowercase();
    let base = lower.rsplit('/').next().unwrap_or_default().to_string();
    let ext = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
        _ => String::new(),
    };
    (base, ext)
}

fn is_dockerfile(base: &str) -> bool {
    base == "dockerfile" || base.starts_with("dockerfile.") || base.ends_with(".dockerfile")
}

fn pattern_family(lower_path: &str, base: &str, ext: &str) -> Option<PatternFamily> {
    if lower_path.contains(".github/workflows/") {
        Some(PatternFamily::Workflow)
    } else if is_dockerfile(base) {
        Some(PatternFamily::Dockerfile)
    } else if base == "makefile" || ext == "mk" {
        Some(PatternFamily::Makefile)
    } else if ext == "yml" || ext == "yaml" {
        Some(PatternFamily::Yaml)
    } else if ext == "json" {
        Some(PatternFamily::Json)
    } else {
        None
    }
}

/// Classify a path into its validation profile.
pub fn classify_file(path: &str) -> FileTypeProfile {
    use CommentStyle::*;
    use FileClass::*;

    let lower = path.to_ascii_lowercase();
    let (base, ext) = split_path(path);
    let family = pattern_family(&lower, &base, &ext);

    let profile = if lower.contains(".github/workflows/") {
        FileTypeProfile::new(Config, 80, ALL_SHELL_CHARS).with_comments(Hash)
    } else if INERT_FILES.contains(&base.as_str()) {
        FileTypeProfile::new(Inert, 120, MINIMAL_CHARS).with_comments(Hash)
    } else if LOCK_FILES.contains(&base.as_str()) {
        let style = if base == "go.sum" { NoComments } else { Hash };
        FileTypeProfile::new(Config, 256, CONFIG_CHARS)
            .with_comments(style)
            .as_manifest()
    } else if DEPENDENCY_MANIFESTS.contains(&base.as_str()) {
        let style = match base.as_str() {
            "go.mod" => CLike,
            "package.json" | "composer.json" => NoComments,
            _ => Hash,
        };
        FileTypeProfile::new(Config, 120, CONFIG_CHARS)
            .with_comments(style)
            .as_manifest()
    } else if is_dockerfile(&base) || BUILD_FILES.contains(&base.as_str()) {
        let style = if ext == "xml" { Markup } else { Hash };
        FileTypeProfile::new(Config, 80, ALL_SHELL_CHARS).with_comments(style)
    } else {
        match ext.as_str() {
            "md" | "markdown" | "rst" | "txt" => {
                let mut p = FileTypeProfile::new(Markdown, 100, MINIMAL_CHARS).with_comments(Markup);
                p.allow_apostrophes = true;
                p
            }
            "yml" | "yaml" => FileTypeProfile::new(Config, 80, ALL_SHELL_CHARS).with_comments(Hash),
            "json" => FileTypeProfile::new(Config, 80, CONFIG_CHARS).with_comments(NoComments),
            "xml" => FileTypeProfile::new(Config, 80, CONFIG_CHARS).with_comments(Markup),
            "toml" | "ini" | "conf" | "config" | "cfg" => {
                FileTypeProfile::new(Config, 80, CONFIG_CHARS).with_comments(Hash)
            }
            "sh" | "bash" | "zsh" | "fish" | "ksh" => {
                FileTypeProfile::new(Code, 80, ALL_SHELL_CHARS).with_comments(Hash)
            }
            "bat" | "cmd" => FileTypeProfile::new(Code, 80, ALL_SHELL_CHARS).with_comments(Batch),
            "py" => FileTypeProfile::new(Code, 80, SCRIPT_CHARS).with_comments(Python),
            "rb" | "pl" => FileTypeProfile::new(Code, 80, SCRIPT_CHARS).with_comments(Hash),
            "php" => FileTypeProfile::new(Code, 80, SCRIPT_CHARS).with_comments(CLikeAndHash),
            "go" | "java" | "c" | "cc" | "cpp" | "h" | "hpp" | "cs" | "rs" | "kt" | "swift"
            | "scala" => FileTypeProfile::new(Code, 120, CODE_CHARS).with_comments(CLike),
            "js" | "ts" | "jsx" | "tsx" | "mjs" | "cjs" => {
                FileTypeProfile::new(Code, 80, CODE_CHARS).with_comments(CLike)
            }
            _ => FileTypeProfile::new(Code, 80, ALL_SHELL_CHARS),
        }
    };

    profile.with_patterns(family)
}

// ---------------------------------------------------------------------------
// Protected paths
// ---------------------------------------------------------------------------

/// Path categories that always require a human, whatever the diff says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedKind {
    ShellScript,
    CiPipeline,
    AutomationWorkflow,
    /// Other platform configuration under `.github/` (owners, bots, templates).
    PlatformConfig,
}

impl ProtectedKind {
    pub fn rejection_reason(self) -> &'static str {
        match self {
            ProtectedKind::ShellScript => "Shell script modifications require manual review",
            ProtectedKind::CiPipeline => "CI/CD configuration changes require manual review",
            ProtectedKind::AutomationWorkflow => {
                "GitHub Actions workflow changes require manual review"
            }
            ProtectedKind::PlatformConfig => "GitHub configuration changes require manual review",
        }
    }
}

const CI_FILES: [&str; 7] = [
    ".travis.yml",
    "jenkinsfile",
    ".gitlab-ci.yml",
    "azure-pipelines.yml",
    "buildspec.yml",
    ".drone.yml",
    "bitbucket-pipelines.yml",
];

const CI_DIRS: [&str; 3] = [".circleci/", ".buildkite/", ".gitlab/"];

const SHELL_EXTENSIONS: [&str; 10] = [
    "sh", "bash", "zsh", "fish", "ksh", "csh", "tcsh", "command", "ps1", "bat",
];

const SHELL_DIRS: [&str; 4] = ["script", "scripts", "bin", ".husky"];

/// The protected category of `path`, if any.
pub fn protected_kind(path: &str) -> Option<ProtectedKind> {
    let lower = path.to_ascii_lowercase();
    let (base, ext) = split_path(path);
    let in_root_dir = |dir: &str| lower.starts_with(dir) || lower.contains(&format!("/{dir}"));

    if in_root_dir(".github/workflows/") {
        return Some(ProtectedKind::AutomationWorkflow);
    }
    if in_root_dir(".github/") {
        return Some(ProtectedKind::PlatformConfig);
    }
    if CI_FILES.contains(&base.as_str()) || CI_DIRS.iter().any(|dir| in_root_dir(dir)) {
        return Some(ProtectedKind::CiPipeline);
    }
    if SHELL_EXTENSIONS.contains(&ext.as_str()) {
        return Some(ProtectedKind::ShellScript);
    }
    let mut dirs = lower.split('/').rev().skip(1);
    if ext.is_empty() && dirs.any(|d| SHELL_DIRS.contains(&d)) {
        return Some(ProtectedKind::ShellScript);
    }
    None
}
