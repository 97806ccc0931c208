//! Source platform queries.
//!
//! The reconciler only needs to know whether a tracked entity is still open;
//! [`EntityStateSource`] is that single question. Statistics and the open
//! pull request backfill ask repository-level questions through
//! [`RepositorySource`]. Both are answered by GitHub in production and by a
//! scripted mock in tests.

mod client;
mod error;

use std::future::Future;

use serde_json::Value;

use crate::types::{EntityKey, RepoName};

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};

/// Current state of a tracked entity on the source platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityState {
    pub is_closed: bool,
    pub merged: bool,
}

impl EntityState {
    pub const OPEN: EntityState = EntityState {
        is_closed: false,
        merged: false,
    };

    pub const CLOSED: EntityState = EntityState {
        is_closed: true,
        merged: false,
    };

    pub const MERGED: EntityState = EntityState {
        is_closed: true,
        merged: true,
    };
}

pub trait EntityStateSource: Send + Sync + 'static {
    fn entity_state(
        &self,
        key: &EntityKey,
    ) -> impl Future<Output = Result<EntityState, GitHubApiError>> + Send;
}

/// Headline counts of one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepoStats {
    /// Commits on the default branch.
    pub commits: u64,
    /// Pull requests in any state.
    pub pull_requests: u64,
    pub merges: u64,
}

pub trait RepositorySource: Send + Sync + 'static {
    fn repo_stats(
        &self,
        repo: &RepoName,
    ) -> impl Future<Output = Result<RepoStats, GitHubApiError>> + Send;

    /// Every open pull request, as webhook-shaped `pull_request` objects.
    fn open_pull_requests(
        &self,
        repo: &RepoName,
    ) -> impl Future<Output = Result<Vec<Value>, GitHubApiError>> + Send;
}
