//! Octocrab-backed source queries.
//!
//! Unlike a repository-scoped client, one [`OctocrabClient`] serves every
//! repository: the tracked key carries `owner/name`.

use octocrab::Octocrab;
use octocrab::models::IssueState;
use octocrab::models::pulls::PullRequest;
use octocrab::params;
use serde_json::{Value, json};
use tracing::debug;

use super::error::GitHubApiError;
use super::{EntityState, EntityStateSource, RepoStats, RepositorySource};
use crate::types::{EntityKey, RepoName};

/// Commit, pull request and merge counts in one round trip.
const REPO_STATS_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef { target { ... on Commit { history { totalCount } } } }
    pullRequests { totalCount }
    merged: pullRequests(states: MERGED) { totalCount }
  }
}
"#;

const PAGE_SIZE: u8 = 100;

#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
}

impl OctocrabClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Authenticated with a personal access token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Unauthenticated; sees public repositories only, at a low rate limit.
    pub fn anonymous() -> Result<Self, octocrab::Error> {
        Ok(Self::new(Octocrab::builder().build()?))
    }

    pub fn inner(&self) -> &Octocrab {
        &self.client
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient").finish_non_exhaustive()
    }
}

impl EntityStateSource for OctocrabClient {
    async fn entity_state(&self, key: &EntityKey) -> Result<EntityState, GitHubApiError> {
        let (owner, name) = key.owner_and_name().ok_or_else(|| {
            GitHubApiError::permanent_without_source(format!("malformed repository in key {key}"))
        })?;

        let pull = self
            .client
            .pulls(owner, name)
            .get(key.number)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        let state = state_of(&pull);
        debug!(key = %key, closed = state.is_closed, merged = state.merged, "Fetched pull request state");
        Ok(state)
    }
}

impl RepositorySource for OctocrabClient {
    async fn repo_stats(&self, repo: &RepoName) -> Result<RepoStats, GitHubApiError> {
        let payload = json!({
            "query": REPO_STATS_QUERY,
            "variables": { "owner": repo.owner(), "name": repo.name() },
        });
        let response: Value = self
            .client
            .graphql(&payload)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        let stats = stats_from_graphql(&response)?;
        debug!(repo = %repo, commits = stats.commits, pull_requests = stats.pull_requests, merges = stats.merges, "Fetched repository stats");
        Ok(stats)
    }

    async fn open_pull_requests(&self, repo: &RepoName) -> Result<Vec<Value>, GitHubApiError> {
        let first = self
            .client
            .pulls(repo.owner(), repo.name())
            .list()
            .state(params::State::Open)
            .per_page(PAGE_SIZE)
            .send()
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        let pulls = self
            .client
            .all_pages(first)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        debug!(repo = %repo, open = pulls.len(), "Listed open pull requests");
        pulls
            .iter()
            .map(|pull| {
                serde_json::to_value(pull).map_err(|e| {
                    GitHubApiError::permanent_without_source(format!("unserializable pull request: {e}"))
                })
            })
            .collect()
    }
}

/// Reads the counts out of a GraphQL response. GitHub reports query errors
/// with a 200 status and an `errors` array.
fn stats_from_graphql(response: &Value) -> Result<RepoStats, GitHubApiError> {
    if let Some(errors) = response.get("errors").and_then(Value::as_array)
        && let Some(first) = errors.first()
    {
        let message = first
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown GraphQL error");
        return Err(match first.get("type").and_then(Value::as_str) {
            Some("NOT_FOUND") => GitHubApiError::not_found(message),
            _ => GitHubApiError::permanent_without_source(message),
        });
    }

    let repository = response
        .pointer("/data/repository")
        .filter(|r| !r.is_null())
        .ok_or_else(|| GitHubApiError::not_found("repository missing from response"))?;
    let count = |pointer: &str| repository.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);
    Ok(RepoStats {
        // An empty repository has no default branch.
        commits: count("/defaultBranchRef/target/history/totalCount"),
        pull_requests: count("/pullRequests/totalCount"),
        merges: count("/merged/totalCount"),
    })
}

fn state_of(pull: &PullRequest) -> EntityState {
    let merged = pull.merged_at.is_some();
    EntityState {
        is_closed: merged || pull.state == Some(IssueState::Closed),
        merged,
    }
}
