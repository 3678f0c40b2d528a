//! Token sources for GitHub authentication.

use std::fmt;

use async_trait::async_trait;
use autoapprove_core::{HostingError, HostingResult};

/// Supplies the bearer token for each request.
///
/// Called per request so that rotating tokens (installation tokens, refreshed
/// OAuth tokens) can be swapped in without rebuilding the client.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> HostingResult<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> HostingResult<String> {
        if self.0.trim().is_empty() {
            return Err(HostingError::Credential("token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// Reads the first non-empty variable of `vars` on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    vars: Vec<String>,
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(["GITHUB_TOKEN", "GH_TOKEN"])
    }
}

impl EnvToken {
    pub fn new<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn token(&self) -> HostingResult<String> {
        self.vars
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                HostingError::Credential(format!("none of {} is set", self.vars.join(", ")))
            })
    }
}
