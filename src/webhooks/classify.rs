//! Event classification.
//!
//! [`classify`] maps an event type and payload to a [`RoutingDecision`]. It is
//! a pure function with a total fallback: every input, including an empty
//! event type or a payload that is not even an object, produces a decision.
//!
//! # Routing Table
//!
//! | Event type                                   | Channel key                 |
//! |----------------------------------------------|-----------------------------|
//! | `push`                                       | commits                     |
//! | `pull_request` (closed and merged)           | merges                      |
//! | `pull_request` (anything else)               | pull_requests               |
//! | `issues`                                     | issues                      |
//! | `release`                                    | releases                    |
//! | `deployment_status`                          | deployment_status           |
//! | `workflow_run`, `workflow_job`, `check_*`    | ci_builds                   |
//! | `gollum`                                     | gollum                      |
//! | anything else                                | bot_logs                    |

use serde_json::Value;

use super::events::EventFamily;
use super::payload::Payload;
use crate::routing::ChannelKey;
use crate::types::EntityKey;

/// Which renderer produces the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatterId {
    Push,
    PullRequest,
    PullRequestMerged,
    Issue,
    Release,
    Deployment,
    WorkflowRun,
    WorkflowJob,
    CheckRun,
    CheckSuite,
    Wiki,
    Generic,
}

/// What the delivery should do to the notification registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Nothing is tracked for this event.
    Untracked,
    /// Record the delivered handles under this key.
    Track(EntityKey),
    /// Delete the notification recorded under this key (the entity closed).
    Retract(EntityKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub channel_key: ChannelKey,
    pub formatter: FormatterId,
    pub lifecycle: Lifecycle,
}

impl RoutingDecision {
    fn untracked(channel_key: ChannelKey, formatter: FormatterId) -> Self {
        RoutingDecision {
            channel_key,
            formatter,
            lifecycle: Lifecycle::Untracked,
        }
    }
}

/// Pull request actions that start tracking a notification.
const TRACKED_PR_ACTIONS: &[&str] = &["opened", "reopened", "ready_for_review"];

/// Actions that are acknowledged but not routed, per event type.
const SKIPPED_ACTIONS: &[(&str, &[&str])] = &[
    ("pull_request", &["synchronize", "edited", "review_requested"]),
    ("issues", &["edited", "labeled", "unlabeled"]),
];

/// Classifies an event. Never fails.
pub fn classify(event_type: &str, payload: &Value) -> RoutingDecision {
    let payload = Payload::new(payload);

    match EventFamily::from_event_type(event_type) {
        EventFamily::Push => RoutingDecision::untracked(ChannelKey::Commits, FormatterId::Push),
        EventFamily::PullRequest => classify_pull_request(payload),
        EventFamily::Issues => RoutingDecision::untracked(ChannelKey::Issues, FormatterId::Issue),
        EventFamily::Release => {
            RoutingDecision::untracked(ChannelKey::Releases, FormatterId::Release)
        }
        EventFamily::DeploymentStatus => {
            RoutingDecision::untracked(ChannelKey::Deployments, FormatterId::Deployment)
        }
        EventFamily::WorkflowRun => {
            RoutingDecision::untracked(ChannelKey::CiBuilds, FormatterId::WorkflowRun)
        }
        EventFamily::WorkflowJob => {
            RoutingDecision::untracked(ChannelKey::CiBuilds, FormatterId::WorkflowJob)
        }
        EventFamily::CheckRun => {
            RoutingDecision::untracked(ChannelKey::CiBuilds, FormatterId::CheckRun)
        }
        EventFamily::CheckSuite => {
            RoutingDecision::untracked(ChannelKey::CiBuilds, FormatterId::CheckSuite)
        }
        EventFamily::Gollum => RoutingDecision::untracked(ChannelKey::Wiki, FormatterId::Wiki),
        EventFamily::Other(_) => {
            RoutingDecision::untracked(ChannelKey::BotLogs, FormatterId::Generic)
        }
    }
}

fn classify_pull_request(payload: Payload<'_>) -> RoutingDecision {
    let action = payload.action().unwrap_or_default();
    let merged = payload.bool(&["pull_request", "merged"]).unwrap_or(false);
    let key = pull_request_key(payload);

    let (channel_key, formatter) = if action == "closed" && merged {
        (ChannelKey::Merges, FormatterId::PullRequestMerged)
    } else {
        (ChannelKey::PullRequests, FormatterId::PullRequest)
    };

    let lifecycle = match key {
        Some(key) if action == "closed" => Lifecycle::Retract(key),
        Some(key) if TRACKED_PR_ACTIONS.contains(&action) => Lifecycle::Track(key),
        _ => Lifecycle::Untracked,
    };

    RoutingDecision {
        channel_key,
        formatter,
        lifecycle,
    }
}

/// Builds the `{repo}#{number}` key of a pull request payload.
pub fn pull_request_key(payload: Payload<'_>) -> Option<EntityKey> {
    let repo = payload.repo_full_name()?;
    let number = payload
        .u64(&["pull_request", "number"])
        .or_else(|| payload.u64(&["number"]))?;
    Some(EntityKey::new(repo, number))
}

/// Returns `false` for noisy actions that should be acknowledged but not routed.
pub fn is_relevant(event_type: &str, payload: &Value) -> bool {
    let action = Payload::new(payload).action();

    match (SKIPPED_ACTIONS.iter().find(|(t, _)| *t == event_type), action) {
        (Some((_, skipped)), Some(action)) => !skipped.contains(&action),
        _ => true,
    }
}
