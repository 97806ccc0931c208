//! Open pull request backfill.
//!
//! Pull requests opened while the relay was down (or before it was deployed)
//! never produced a webhook. A backfill lists the open pull requests of each
//! configured repository and runs every one that is not yet tracked through
//! the normal pipeline as if it had just been opened.

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::{DispatchOutcome, Dispatcher};
use crate::discord::MessagingPlatform;
use crate::github::RepositorySource;
use crate::types::{EntityKey, RepoName};
use crate::webhooks::Event;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Open pull requests seen across all repositories.
    pub open: usize,
    pub already_tracked: usize,
    /// Newly delivered and tracked.
    pub added: usize,
    /// Repositories that could not be listed, plus pull requests whose
    /// delivery did not end up tracked.
    pub errors: usize,
}

impl<P: MessagingPlatform> Dispatcher<P> {
    /// Posts and tracks every open pull request in `repos` that is not
    /// tracked yet.
    #[instrument(skip_all, fields(repos = repos.len()))]
    pub async fn backfill<S: RepositorySource>(&self, source: &S, repos: &[RepoName]) -> BackfillReport {
        let mut report = BackfillReport::default();

        for repo in repos {
            let pulls = match source.open_pull_requests(repo).await {
                Ok(pulls) => pulls,
                Err(e) => {
                    warn!(repo = %repo, error = %e, "Failed to list open pull requests");
                    report.errors += 1;
                    continue;
                }
            };

            for pull in pulls {
                let Some(number) = pull.get("number").and_then(Value::as_u64) else {
                    warn!(repo = %repo, "Open pull request without a number, skipping");
                    report.errors += 1;
                    continue;
                };
                report.open += 1;
                let payload = opened_payload(repo, number, pull);
                // Webhooks key by GitHub's canonical full name, which may
                // differ in case from the configured one.
                let full_name = payload
                    .pointer("/repository/full_name")
                    .and_then(Value::as_str)
                    .map_or_else(|| repo.to_string(), str::to_string);
                let key = EntityKey::new(full_name, number);
                if self.registry.contains(&key) {
                    report.already_tracked += 1;
                    continue;
                }

                let event = Event::new("pull_request", payload);
                let outcome = self.dispatch(&event).await;
                match outcome {
                    DispatchOutcome::Delivered(_) if self.registry.contains(&key) => report.added += 1,
                    _ => {
                        warn!(key = %key, "Backfilled pull request was not tracked");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            open = report.open,
            already_tracked = report.already_tracked,
            added = report.added,
            errors = report.errors,
            "Backfill finished"
        );
        report
    }
}

/// The `pull_request` webhook body GitHub would have sent on opening.
fn opened_payload(repo: &RepoName, number: u64, pull: Value) -> Value {
    let repository = pull
        .pointer("/base/repo")
        .filter(|r| r.get("full_name").is_some_and(Value::is_string))
        .cloned()
        .unwrap_or_else(|| json!({ "full_name": repo.to_string() }));
    json!({
        "action": "opened",
        "number": number,
        "pull_request": pull,
        "repository": repository,
    })
}
