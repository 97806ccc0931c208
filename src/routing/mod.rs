//! Channel routing.
//!
//! Routing is two-step: the classifier picks a logical [`ChannelKey`], and the
//! [`ChannelRouter`] resolves it to a physical [`ChannelId`] through the
//! static [`ChannelMap`]. Resolution never fails outright. A key with no
//! configured channel falls back to the bot-logs channel, and only when that
//! is missing too does the event become unroutable (logged as a configuration
//! error, never raised).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, warn};

use crate::types::ChannelId;

/// Logical destination of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    Commits,
    PullRequests,
    Merges,
    Issues,
    Releases,
    Deployments,
    CiBuilds,
    Wiki,
    BotLogs,
    CommitsOverview,
    PullRequestsOverview,
    MergesOverview,
}

impl ChannelKey {
    pub const ALL: [ChannelKey; 12] = [
        ChannelKey::Commits,
        ChannelKey::PullRequests,
        ChannelKey::Merges,
        ChannelKey::Issues,
        ChannelKey::Releases,
        ChannelKey::Deployments,
        ChannelKey::CiBuilds,
        ChannelKey::Wiki,
        ChannelKey::BotLogs,
        ChannelKey::CommitsOverview,
        ChannelKey::PullRequestsOverview,
        ChannelKey::MergesOverview,
    ];

    /// Name used on the command line and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKey::Commits => "commits",
            ChannelKey::PullRequests => "pull_requests",
            ChannelKey::Merges => "merges",
            ChannelKey::Issues => "issues",
            ChannelKey::Releases => "releases",
            ChannelKey::Deployments => "deployment_status",
            ChannelKey::CiBuilds => "ci_builds",
            ChannelKey::Wiki => "gollum",
            ChannelKey::BotLogs => "bot_logs",
            ChannelKey::CommitsOverview => "commits_overview",
            ChannelKey::PullRequestsOverview => "pull_requests_overview",
            ChannelKey::MergesOverview => "merges_overview",
        }
    }

    /// Environment variable holding this key's channel id.
    pub fn env_var(&self) -> &'static str {
        match self {
            ChannelKey::Commits => "CHANNEL_COMMITS",
            ChannelKey::PullRequests => "CHANNEL_PULL_REQUESTS",
            ChannelKey::Merges => "CHANNEL_CODE_MERGES",
            ChannelKey::Issues => "CHANNEL_ISSUES",
            ChannelKey::Releases => "CHANNEL_RELEASES",
            ChannelKey::Deployments => "CHANNEL_DEPLOYMENT_STATUS",
            ChannelKey::CiBuilds => "CHANNEL_CI_BUILDS",
            ChannelKey::Wiki => "CHANNEL_GOLLUM",
            ChannelKey::BotLogs => "CHANNEL_BOT_LOGS",
            ChannelKey::CommitsOverview => "CHANNEL_COMMITS_OVERVIEW",
            ChannelKey::PullRequestsOverview => "CHANNEL_PULL_REQUESTS_OVERVIEW",
            ChannelKey::MergesOverview => "CHANNEL_MERGES_OVERVIEW",
        }
    }

    pub fn parse(name: &str) -> Option<ChannelKey> {
        ChannelKey::ALL.into_iter().find(|key| key.name() == name)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static mapping from channel keys to configured channel ids.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    channels: HashMap<ChannelKey, ChannelId>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests.
    pub fn with(mut self, key: ChannelKey, channel: impl Into<ChannelId>) -> Self {
        self.insert(key, channel.into());
        self
    }

    pub fn insert(&mut self, key: ChannelKey, channel: ChannelId) {
        self.channels.insert(key, channel);
    }

    pub fn get(&self, key: ChannelKey) -> Option<ChannelId> {
        self.channels.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Outcome of resolving a channel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The key's own channel.
    Direct(ChannelId),
    /// The key was unconfigured; this is the bot-logs channel.
    Fallback(ChannelId),
    /// Neither the key nor bot-logs is configured.
    Unroutable,
}

impl Resolution {
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Resolution::Direct(id) | Resolution::Fallback(id) => Some(*id),
            Resolution::Unroutable => None,
        }
    }
}

/// Resolves channel keys against a shared [`ChannelMap`].
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    map: Arc<ChannelMap>,
}

impl ChannelRouter {
    pub fn new(map: ChannelMap) -> Self {
        ChannelRouter { map: Arc::new(map) }
    }

    pub fn map(&self) -> &ChannelMap {
        &self.map
    }

    /// Resolves `key`, falling back to bot-logs and finally to
    /// [`Resolution::Unroutable`].
    pub fn resolve(&self, key: ChannelKey) -> Resolution {
        if let Some(id) = self.map.get(key) {
            return Resolution::Direct(id);
        }

        match self.map.get(ChannelKey::BotLogs) {
            Some(id) => {
                warn!(key = %key, fallback = %id, "Channel key not configured, using bot-logs");
                Resolution::Fallback(id)
            }
            None => {
                error!(
                    key = %key,
                    env = key.env_var(),
                    "Configuration error: channel key and bot-logs channel are both unconfigured"
                );
                Resolution::Unroutable
            }
        }
    }

    pub fn bot_logs(&self) -> Option<ChannelId> {
        self.map.get(ChannelKey::BotLogs)
    }
}
