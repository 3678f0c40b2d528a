//! GitHub REST/GraphQL client implementing [`HostingApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoapprove_core::{
    ChangeId, ChangeRequest, CheckRun, CombinedStatus, CommentKind, CommentRecord, FileDelta,
    HostingApi, HostingError, HostingResult, RepoPermission, RetryPolicy, ReviewRecord,
};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::credential::CredentialProvider;
use crate::error::{classify_response, classify_transport};
use crate::wire;

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const CLEAN: &str = "clean";
const CLEAN_STATUS_ERROR: &str = "Pull request is in clean status";

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// REST root, e.g. `https://api.github.com` or `https://ghe.example/api/v3`.
    pub api_url: String,
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub page_size: usize,
    /// Upper bound on pages fetched for one listing.
    pub max_pages: usize,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_url: "https://api.github.com".to_string(),
            user_agent: format!("autoapprove/{}", autoapprove_core::VERSION),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            page_size: 100,
            max_pages: 30,
        }
    }
}

impl GitHubConfig {
    pub fn new(api_url: &str) -> Self {
        GitHubConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GraphQL endpoint matching `api_url`.
    pub fn graphql_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        match base.strip_suffix("/api/v3") {
            Some(host) => format!("{host}/api/graphql"),
            None => format!("{base}/graphql"),
        }
    }
}

/// GitHub client for reads and review actions on pull requests.
pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig, credentials: Arc<dyn CredentialProvider>) -> HostingResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| HostingError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(GitHubClient {
            config,
            http,
            credentials,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url, path.trim_start_matches('/'))
    }

    /// One HTTP exchange; returns the body of a 2xx response.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        resource: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> HostingResult<String> {
        let token = self.credentials.token().await?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, resource, "github request");
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(classify_transport)?;
        if status.is_success() {
            Ok(text)
        } else {
            debug!(%method, resource, status = status.as_u16(), "github request failed");
            Err(classify_response(status, &headers, &text, resource))
        }
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> HostingResult<String> {
        let url = self.url(path);
        self.config
            .retry
            .run(path, || self.send(method.clone(), &url, path, query, body))
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> HostingResult<T> {
        let text = self.execute::<()>(Method::GET, path, query, None).await?;
        decode(&text, path)
    }

    /// Collect every page of a JSON-array listing.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &[(&str, String)],
    ) -> HostingResult<Vec<T>> {
        let mut items = Vec::new();
        for page in 1..=self.config.max_pages {
            let mut query = filters.to_vec();
            query.push(("per_page", self.config.page_size.to_string()));
            query.push(("page", page.to_string()));
            let batch: Vec<T> = self.get_json(path, &query).await?;
            let last = batch.len() < self.config.page_size;
            items.extend(batch);
            if last {
                break;
            }
        }
        Ok(items)
    }

    async fn pull(&self, id: &ChangeId) -> HostingResult<wire::PullRequest> {
        self.get_json(&pull_path(id), &[]).await
    }
}

fn repo_path(owner: &str, repo: &str) -> String {
    format!("repos/{owner}/{repo}")
}

fn pull_path(id: &ChangeId) -> String {
    format!("{}/pulls/{}", repo_path(&id.owner, &id.repo), id.number)
}

fn decode<T: DeserializeOwned>(text: &str, resource: &str) -> HostingResult<T> {
    serde_json::from_str(text).map_err(|e| HostingError::Decode(format!("{resource}: {e}")))
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn authenticated_user(&self) -> HostingResult<String> {
        let user: wire::User = self.get_json("user", &[]).await?;
        Ok(user.login)
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn change(&self, id: &ChangeId) -> HostingResult<ChangeRequest> {
        Ok(self.pull(id).await?.into_change(id))
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn changed_files(&self, id: &ChangeId) -> HostingResult<Vec<FileDelta>> {
        let files: Vec<wire::File> = self
            .get_paginated(&format!("{}/files", pull_path(id)), &[])
            .await?;
        Ok(files.into_iter().map(FileDelta::from).collect())
    }

    async fn combined_status(&self, id: &ChangeId, git_ref: &str) -> HostingResult<CombinedStatus> {
        let path = format!("{}/commits/{git_ref}/status", repo_path(&id.owner, &id.repo));
        let combined: wire::Combined = self.get_json(&path, &[]).await?;
        Ok(combined.into())
    }

    async fn check_runs(&self, id: &ChangeId, git_ref: &str) -> HostingResult<Vec<CheckRun>> {
        let path = format!("{}/commits/{git_ref}/check-runs", repo_path(&id.owner, &id.repo));
        let mut runs = Vec::new();
        for page in 1..=self.config.max_pages {
            let query = [
                ("per_page", self.config.page_size.to_string()),
                ("page", page.to_string()),
            ];
            let batch: wire::CheckRunPage = self.get_json(&path, &query).await?;
            let fetched = batch.check_runs.len();
            runs.extend(batch.check_runs.into_iter().map(CheckRun::from));
            if fetched < self.config.page_size || runs.len() >= batch.total_count {
                break;
            }
        }
        Ok(runs)
    }

    async fn reviews(&self, id: &ChangeId) -> HostingResult<Vec<ReviewRecord>> {
        let reviews: Vec<wire::Review> = self
            .get_paginated(&format!("{}/reviews", pull_path(id)), &[])
            .await?;
        Ok(reviews.into_iter().map(ReviewRecord::from).collect())
    }

    async fn issue_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>> {
        let path = format!(
            "{}/issues/{}/comments",
            repo_path(&id.owner, &id.repo),
            id.number
        );
        let comments: Vec<wire::Comment> = self.get_paginated(&path, &[]).await?;
        Ok(comments
            .into_iter()
            .map(|c| c.into_record(CommentKind::Issue))
            .collect())
    }

    async fn review_comments(&self, id: &ChangeId) -> HostingResult<Vec<CommentRecord>> {
        let comments: Vec<wire::Comment> = self
            .get_paginated(&format!("{}/comments", pull_path(id)), &[])
            .await?;
        Ok(comments
            .into_iter()
            .map(|c| c.into_record(CommentKind::Review))
            .collect())
    }

    async fn user_permission(&self, id: &ChangeId, login: &str) -> HostingResult<RepoPermission> {
        let path = format!(
            "{}/collaborators/{login}/permission",
            repo_path(&id.owner, &id.repo)
        );
        let level: wire::PermissionLevel = self.get_json(&path, &[]).await?;
        // role_name distinguishes triage and maintain, which permission folds away.
        let role = level
            .role_name
            .as_deref()
            .and_then(|r| r.parse::<RepoPermission>().ok());
        match role {
            Some(role) => Ok(role),
            None => level
                .permission
                .parse::<RepoPermission>()
                .map_err(HostingError::Decode),
        }
    }

    async fn open_changes(&self, owner: &str, repo: &str) -> HostingResult<Vec<ChangeId>> {
        let path = format!("{}/pulls", repo_path(owner, repo));
        let pulls: Vec<wire::PullSummary> = self
            .get_paginated(&path, &[("state", "open".to_string())])
            .await?;
        Ok(pulls
            .into_iter()
            .map(|p| ChangeId::new(owner, repo, p.number))
            .collect())
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn approve(&self, id: &ChangeId, body: &str) -> HostingResult<()> {
        let review = wire::CreateReview {
            body,
            event: "APPROVE",
        };
        self.execute(Method::POST, &format!("{}/reviews", pull_path(id)), &[], Some(&review))
            .await?;
        info!(event = "github.approved", change = %id, "review submitted");
        Ok(())
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn enable_auto_merge(&self, id: &ChangeId) -> HostingResult<()> {
        let pull = self.pull(id).await?;
        if pull.mergeable_state.as_deref() == Some(CLEAN) {
            return Err(HostingError::ReadyToMerge);
        }
        if pull.node_id.is_empty() {
            return Err(HostingError::Decode(format!("{id}: pull request has no node_id")));
        }
        let request = wire::GraphQlRequest {
            query: wire::ENABLE_AUTO_MERGE,
            variables: serde_json::json!({ "pullRequestId": pull.node_id }),
        };
        let url = self.config.graphql_url();
        let text = self
            .config
            .retry
            .run("graphql", || {
                self.send(Method::POST, &url, "graphql", &[], Some(&request))
            })
            .await?;

        // GraphQL reports failures inside a 200 body; surfaced as 422.
        let response: wire::GraphQlResponse = decode(&text, "graphql")?;
        if !response.errors.is_empty() {
            // State changed between the read and the mutation.
            if response.errors.iter().any(|e| e.message.contains(CLEAN_STATUS_ERROR)) {
                return Err(HostingError::ReadyToMerge);
            }
            let message = response
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HostingError::Api {
                status: 422,
                message,
            });
        }
        info!(event = "github.auto_merge_enabled", change = %id, "auto-merge enabled");
        Ok(())
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn merge(&self, id: &ChangeId) -> HostingResult<()> {
        let request = wire::MergeRequest {
            merge_method: "squash",
        };
        self.execute(Method::PUT, &format!("{}/merge", pull_path(id)), &[], Some(&request))
            .await?;
        info!(event = "github.merged", change = %id, "pull request merged");
        Ok(())
    }

    #[instrument(skip_all, fields(change = %id))]
    async fn update_branch(&self, id: &ChangeId) -> HostingResult<()> {
        self.execute::<()>(Method::PUT, &format!("{}/update-branch", pull_path(id)), &[], None)
            .await?;
        info!(event = "github.branch_updated", change = %id, "branch update requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphql_url_for_enterprise_and_public() {
        assert_eq!(
            GitHubConfig::default().graphql_url(),
            "https://api.github.com/graphql"
        );
        assert_eq!(
            GitHubConfig::new("https://ghe.example/api/v3/").graphql_url(),
            "https://ghe.example/api/graphql"
        );
    }

    #[test]
    fn test_paths() {
        let id = ChangeId::new("acme", "widgets", 12);
        assert_eq!(pull_path(&id), "repos/acme/widgets/pulls/12");
    }
}
