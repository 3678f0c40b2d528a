//! Configuration for the decision engine and its front ends.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional
//! TOML file ([`AppConfig::load`]), environment variables
//! ([`AppConfig::apply_env`]), then command-line flags applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusConfig;
use crate::domain::RepoPermission;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Policy knobs of the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum time since last activity, in seconds. 0 disables the bound.
    pub min_open_secs: u64,
    /// Maximum time since last activity, in seconds. 0 disables the bound.
    pub max_open_secs: u64,
    pub max_files: u64,
    pub max_lines: u64,
    pub skip_first_time: bool,
    pub skip_draft: bool,
    pub require_passing_checks: bool,
    /// Ignore failing signing checks on changes authored by bots.
    pub ignore_signing_checks: bool,
    /// Run the whole-change single-model gate.
    pub semantic_analysis: bool,
    /// Route non-trivial files of trusted authors to multi-model consensus.
    pub multi_model: bool,
    /// Blended confidence a consensus must reach.
    pub consensus_confidence_bar: f64,
    /// Logins allowed consensus override, compared case-insensitively.
    pub trusted_users: Vec<String>,
    /// Repository permission levels allowed consensus override.
    pub trusted_roles: Vec<RepoPermission>,
    /// Logins of automated dependency-update bots.
    pub dependency_bots: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_open_secs: 0,
            max_open_secs: 0,
            max_files: 5,
            max_lines: 250,
            skip_first_time: true,
            skip_draft: true,
            require_passing_checks: true,
            ignore_signing_checks: true,
            semantic_analysis: true,
            multi_model: false,
            consensus_confidence_bar: 0.85,
            trusted_users: Vec::new(),
            trusted_roles: Vec::new(),
            dependency_bots: vec!["dependabot[bot]".to_string(), "dependabot".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_files == 0 {
            return Err(ConfigError::Invalid("max_files must be at least 1".into()));
        }
        if self.max_lines == 0 {
            return Err(ConfigError::Invalid("max_lines must be at least 1".into()));
        }
        if self.min_open_secs > 0 && self.max_open_secs > 0 && self.min_open_secs > self.max_open_secs {
            return Err(ConfigError::Invalid(format!(
                "min_open_secs ({}) exceeds max_open_secs ({})",
                self.min_open_secs, self.max_open_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.consensus_confidence_bar) {
            return Err(ConfigError::Invalid(format!(
                "consensus_confidence_bar {} outside [0, 1]",
                self.consensus_confidence_bar
            )));
        }
        Ok(())
    }

    pub fn min_open(&self) -> Option<Duration> {
        (self.min_open_secs > 0).then(|| Duration::from_secs(self.min_open_secs))
    }

    pub fn max_open(&self) -> Option<Duration> {
        (self.max_open_secs > 0).then(|| Duration::from_secs(self.max_open_secs))
    }

    pub fn is_dependency_bot(&self, login: &str) -> bool {
        self.dependency_bots.iter().any(|b| b.eq_ignore_ascii_case(login))
    }

    pub fn is_trusted_user(&self, login: &str) -> bool {
        self.trusted_users.iter().any(|u| u.eq_ignore_ascii_case(login))
    }

    /// True when `permission` meets the lowest configured trusted role.
    pub fn is_trusted_role(&self, permission: RepoPermission) -> bool {
        self.trusted_roles
            .iter()
            .min()
            .is_some_and(|threshold| permission >= *threshold)
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model used by the whole-change semantic gate.
    pub model: String,
    /// Models taking part in consensus, in priority order.
    pub consensus_models: Vec<String>,
    #[serde(flatten)]
    pub consensus: ConsensusConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            consensus_models: vec!["gemini-2.5-flash".to_string(), "gemini-2.5-pro".to_string()],
            consensus: ConsensusConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Report decisions without writing anything.
    pub dry_run: bool,
    pub auto_merge: bool,
    pub update_branch: bool,
    pub approval_body: String,
    /// Seconds between polling rounds in watch mode.
    pub poll_interval_secs: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            auto_merge: false,
            update_branch: false,
            approval_body: "Auto-approved: trivial change, all checks passed.".to_string(),
            poll_interval_secs: 3600,
        }
    }
}

/// Endpoints and secrets. Secrets come from the environment only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub github_api_url: String,
    pub gemini_api_url: String,
    #[serde(skip)]
    pub github_token: Option<String>,
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            github_api_url: "https://api.github.com".to_string(),
            gemini_api_url: "https://generativelanguage.googleapis.com".to_string(),
            github_token: None,
            gemini_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub models: ModelsConfig,
    pub actions: ActionConfig,
    pub services: ServiceConfig,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str, origin: &Path) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read `path`, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("GITHUB_TOKEN").or_else(|| non_empty("GH_TOKEN")) {
            self.services.github_token = Some(token);
        }
        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.services.gemini_api_key = Some(key);
        }
        if let Some(url) = non_empty("GITHUB_API_URL") {
            self.services.github_api_url = url;
        }
        if let Some(url) = non_empty("GEMINI_API_URL") {
            self.services.gemini_api_url = url;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        if self.engine.multi_model && self.models.consensus_models.len() < 2 {
            return Err(ConfigError::Invalid(
                "multi_model needs at least 2 consensus_models".into(),
            ));
        }
        if self.actions.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.max_files, 5);
        assert_eq!(config.engine.max_lines, 250);
        assert!(config.engine.is_dependency_bot("Dependabot[bot]"));
    }

    #[test]
    fn test_validate_rejects_inverted_age_window() {
        let config = EngineConfig {
            min_open_secs: 7200,
            max_open_secs: 3600,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [engine]
            max_files = 3
            trusted_users = ["Alice"]
            trusted_roles = ["maintain"]

            [models]
            per_model_timeout = 10
        "#;
        let config = AppConfig::from_toml(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.engine.max_files, 3);
        assert_eq!(config.engine.max_lines, 250);
        assert!(config.engine.is_trusted_user("alice"));
        assert!(config.engine.is_trusted_role(RepoPermission::Admin));
        assert!(!config.engine.is_trusted_role(RepoPermission::Write));
        assert_eq!(config.models.consensus.per_model_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoapprove.toml");
        std::fs::write(&path, "[actions]\ndry_run = true\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(config.actions.dry_run);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(AppConfig::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("GH_TOKEN", "ghp_x"), ("GITHUB_TOKEN", ""), ("GEMINI_API_URL", "http://localhost:9")]
            .into_iter()
            .collect();
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.services.github_token.as_deref(), Some("ghp_x"));
        assert_eq!(config.services.gemini_api_url, "http://localhost:9");
        assert!(config.services.gemini_api_key.is_none());
    }

    #[test]
    fn test_no_trusted_roles_trusts_nobody() {
        assert!(!EngineConfig::default().is_trusted_role(RepoPermission::Admin));
    }
}
