//! Change-request snapshot types.
//!
//! A [`ChangeRequest`] and its [`FileDelta`]s are fetched once per evaluation
//! and never mutated by the engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Identity of a reviewable change: `owner/repo#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl ChangeId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Reject identities that can never address a real change.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner);
        }
        if self.repo.trim().is_empty() {
            return Err(ValidationError::EmptyRepo);
        }
        if self.number == 0 {
            return Err(ValidationError::InvalidNumber(self.number));
        }
        Ok(())
    }

    /// Browser URL of the change on github.com.
    pub fn html_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/pull/{}",
            self.owner, self.repo, self.number
        )
    }

    /// Parse a pull request URL (`https://github.com/o/r/pull/7`) or the
    /// `o/r#7` shorthand.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let fail = |reason: &str| ValidationError::UnparseableReference {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = input.trim();

        let id = if let Some((slug, number)) = trimmed.split_once('#') {
            let (owner, repo) = slug
                .split_once('/')
                .ok_or_else(|| fail("expected owner/repo#number"))?;
            let number = number
                .parse::<u64>()
                .map_err(|_| fail("number is not an integer"))?;
            ChangeId::new(owner, repo, number)
        } else {
            let path = trimmed
                .strip_prefix("https://")
                .or_else(|| trimmed.strip_prefix("http://"))
                .ok_or_else(|| fail("expected a URL or owner/repo#number"))?;
            let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
            if parts.len() < 5 || (parts[3] != "pull" && parts[3] != "pulls") {
                return Err(fail("expected https://<host>/<owner>/<repo>/pull/<number>"));
            }
            let number = parts[4]
                .parse::<u64>()
                .map_err(|_| fail("number is not an integer"))?;
            ChangeId::new(parts[1], parts[2], number)
        };

        id.validate()?;
        Ok(id)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl FromStr for ChangeId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lifecycle state of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Open,
    Closed,
    Merged,
}

/// The author's relationship to the repository, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorAssociation {
    Owner,
    Member,
    Collaborator,
    Contributor,
    FirstTimeContributor,
    FirstTimer,
    Mannequin,
    #[serde(other)]
    None,
}

impl AuthorAssociation {
    /// Owners, members and collaborators speak for the repository.
    pub fn is_elevated(self) -> bool {
        matches!(
            self,
            AuthorAssociation::Owner | AuthorAssociation::Member | AuthorAssociation::Collaborator
        )
    }

    pub fn is_first_time(self) -> bool {
        matches!(
            self,
            AuthorAssociation::FirstTimeContributor | AuthorAssociation::FirstTimer
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthorAssociation::Owner => "OWNER",
            AuthorAssociation::Member => "MEMBER",
            AuthorAssociation::Collaborator => "COLLABORATOR",
            AuthorAssociation::Contributor => "CONTRIBUTOR",
            AuthorAssociation::FirstTimeContributor => "FIRST_TIME_CONTRIBUTOR",
            AuthorAssociation::FirstTimer => "FIRST_TIMER",
            AuthorAssociation::Mannequin => "MANNEQUIN",
            AuthorAssociation::None => "NONE",
        }
    }
}

impl fmt::Display for AuthorAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository permission level of a user, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoPermission {
    None,
    Read,
    Triage,
    Write,
    Maintain,
    Admin,
}

impl RepoPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoPermission::None => "none",
            RepoPermission::Read => "read",
            RepoPermission::Triage => "triage",
            RepoPermission::Write => "write",
            RepoPermission::Maintain => "maintain",
            RepoPermission::Admin => "admin",
        }
    }
}

impl FromStr for RepoPermission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RepoPermission::None),
            "read" | "pull" => Ok(RepoPermission::Read),
            "triage" => Ok(RepoPermission::Triage),
            "write" | "push" => Ok(RepoPermission::Write),
            "maintain" => Ok(RepoPermission::Maintain),
            "admin" => Ok(RepoPermission::Admin),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

impl fmt::Display for RepoPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who opened the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
    /// The host marks the account as an automation bot.
    #[serde(default)]
    pub is_bot: bool,
}

impl Author {
    pub fn user(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            is_bot: false,
        }
    }

    pub fn bot(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            is_bot: true,
        }
    }
}

/// Metadata snapshot of one change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: ChangeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: ChangeState,
    #[serde(default)]
    pub draft: bool,
    pub author: Author,
    pub author_association: AuthorAssociation,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub changed_files: u64,
    pub additions: u64,
    pub deletions: u64,
    pub base_ref: String,
    pub head_ref: String,
    /// Commit the CI gate checks; absent when the host did not report one.
    pub head_sha: Option<String>,
}

impl ChangeRequest {
    /// Timestamp of the most recent activity, falling back to creation.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }

    pub fn total_lines(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// One changed file of a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
    /// Unified diff body; absent for binary or oversized files.
    pub patch: Option<String>,
}

impl FileDelta {
    pub fn new(path: impl Into<String>, patch: impl Into<String>) -> Self {
        let patch = patch.into();
        let (additions, deletions) = count_patch_lines(&patch);
        Self {
            path: path.into(),
            additions,
            deletions,
            patch: Some(patch),
        }
    }
}

fn count_patch_lines(patch: &str) -> (u64, u64) {
    patch.lines().fold((0, 0), |(add, del), line| {
        if line.starts_with("+++") || line.starts_with("---") {
            (add, del)
        } else if line.starts_with('+') {
            (add + 1, del)
        } else if line.starts_with('-') {
            (add, del + 1)
        } else {
            (add, del)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pull_url() {
        let id = ChangeId::parse("https://github.com/octo/widgets/pull/42").unwrap();
        assert_eq!(id, ChangeId::new("octo", "widgets", 42));
        assert_eq!(id.to_string(), "octo/widgets#42");
    }

    #[test]
    fn test_parse_url_with_trailing_segments() {
        let id = ChangeId::parse("https://github.com/octo/widgets/pull/42/files").unwrap();
        assert_eq!(id.number, 42);
    }

    #[test]
    fn test_parse_shorthand() {
        let id: ChangeId = "octo/widgets#7".parse().unwrap();
        assert_eq!(id, ChangeId::new("octo", "widgets", 7));
    }

    #[test]
    fn test_parse_rejects_issue_url() {
        let err = ChangeId::parse("https://github.com/octo/widgets/issues/7").unwrap_err();
        assert!(matches!(err, ValidationError::UnparseableReference { .. }));
    }

    #[test]
    fn test_parse_rejects_zero() {
        let err = ChangeId::parse("octo/widgets#0").unwrap_err();
        assert_eq!(err, ValidationError::InvalidNumber(0));
    }

    #[test]
    fn test_validate_empty_fields() {
        assert_eq!(
            ChangeId::new("", "r", 1).validate(),
            Err(ValidationError::EmptyOwner)
        );
        assert_eq!(
            ChangeId::new("o", " ", 1).validate(),
            Err(ValidationError::EmptyRepo)
        );
    }

    #[test]
    fn test_association_serde_and_flags() {
        let a: AuthorAssociation = serde_json::from_str("\"FIRST_TIME_CONTRIBUTOR\"").unwrap();
        assert!(a.is_first_time());
        assert!(!a.is_elevated());
        let unknown: AuthorAssociation = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(unknown, AuthorAssociation::None);
        assert!(AuthorAssociation::Member.is_elevated());
    }

    #[test]
    fn test_permission_ordering_and_aliases() {
        assert!(RepoPermission::Admin > RepoPermission::Write);
        assert_eq!("push".parse::<RepoPermission>(), Ok(RepoPermission::Write));
        assert!("owner".parse::<RepoPermission>().is_err());
    }

    #[test]
    fn test_file_delta_counts_lines() {
        let delta = FileDelta::new("a.md", "@@ -1 +1 @@\n-old\n+new\n+more\n context");
        assert_eq!(delta.additions, 2);
        assert_eq!(delta.deletions, 1);
    }
}
