//! Runtime configuration from the environment.
//!
//! Everything is read once at startup into an immutable [`Config`]. A `.env`
//! file in the working directory is honored (see `main`), but real
//! environment variables take precedence.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::format::PlatformLimits;
use crate::routing::{ChannelKey, ChannelMap};
use crate::types::{ChannelId, RepoName};
use crate::webhooks::WebhookSecret;

/// File name of the registry inside the state directory.
pub const REGISTRY_FILE: &str = "notification_registry.json";

/// File name of the standing stats message handles inside the state directory.
pub const STATS_FILE: &str = "stats_messages.json";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_STATS_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_RETENTION_DAYS: u64 = 30;
const DEFAULT_STATE_DIR: &str = "./state";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub github_token: Option<String>,
    pub webhook_secret: Option<WebhookSecret>,
    pub listen_addr: SocketAddr,
    pub channels: ChannelMap,
    pub cleanup_interval: Duration,
    pub stats_interval: Duration,
    /// Repositories covered by statistics and backfill.
    pub repositories: Vec<RepoName>,
    pub retention: chrono::Duration,
    pub state_dir: PathBuf,
    pub limits: PlatformLimits,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = get("DISCORD_BOT_TOKEN").ok_or(ConfigError::Missing("DISCORD_BOT_TOKEN"))?;

        let host = match get("HOST") {
            Some(v) => parse::<IpAddr>("HOST", v)?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = match get("PORT") {
            Some(v) => parse::<u16>("PORT", v)?,
            None => DEFAULT_PORT,
        };

        let mut channels = ChannelMap::new();
        for key in ChannelKey::ALL {
            if let Some(v) = get(key.env_var()) {
                channels.insert(key, ChannelId(parse::<u64>(key.env_var(), v)?));
            }
        }

        let cleanup_interval = minutes(
            "PR_CLEANUP_INTERVAL_MINUTES",
            get("PR_CLEANUP_INTERVAL_MINUTES"),
            DEFAULT_CLEANUP_INTERVAL_MINUTES,
        )?;
        let stats_interval = minutes(
            "STATS_UPDATE_INTERVAL_MINUTES",
            get("STATS_UPDATE_INTERVAL_MINUTES"),
            DEFAULT_STATS_INTERVAL_MINUTES,
        )?;
        let retention = days("MESSAGE_RETENTION_DAYS", get("MESSAGE_RETENTION_DAYS"), DEFAULT_RETENTION_DAYS)?;

        let repositories = match get("GITHUB_REPOSITORIES") {
            Some(v) => repositories("GITHUB_REPOSITORIES", v)?,
            None => Vec::new(),
        };
        let max_fields = match get("MAX_FIELDS_PER_MESSAGE") {
            Some(v) => {
                let n = positive("MAX_FIELDS_PER_MESSAGE", v.clone())?;
                if n > PlatformLimits::DISCORD.max_fields as u64 {
                    return Err(ConfigError::Invalid {
                        var: "MAX_FIELDS_PER_MESSAGE",
                        value: v,
                        reason: format!("at most {} fields are allowed", PlatformLimits::DISCORD.max_fields),
                    });
                }
                n as usize
            }
            None => PlatformLimits::DISCORD.max_fields,
        };

        Ok(Config {
            discord_token,
            github_token: get("GITHUB_TOKEN"),
            webhook_secret: get("GITHUB_WEBHOOK_SECRET").map(WebhookSecret::new),
            listen_addr: SocketAddr::new(host, port),
            channels,
            cleanup_interval,
            stats_interval,
            repositories,
            retention,
            state_dir: get("STATE_DIR").map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from),
            limits: PlatformLimits::DISCORD.with_max_fields(max_fields),
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join(REGISTRY_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.state_dir.join(STATS_FILE)
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn positive(var: &'static str, value: String) -> Result<u64, ConfigError> {
    match parse::<u64>(var, value.clone())? {
        0 => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

fn too_large(var: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: "too large".to_string(),
    }
}

/// A positive number of minutes.
fn minutes(var: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default * 60));
    };
    let n = positive(var, value.clone())?;
    n.checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| too_large(var, value))
}

/// A positive number of days.
fn days(var: &'static str, value: Option<String>, default: u64) -> Result<chrono::TimeDelta, ConfigError> {
    let (n, value) = match value {
        Some(v) => (positive(var, v.clone())?, v),
        None => (default, default.to_string()),
    };
    i64::try_from(n)
        .ok()
        .and_then(chrono::TimeDelta::try_days)
        .ok_or_else(|| too_large(var, value))
}

/// Comma separated `owner/name` list. Duplicates are dropped, order kept.
fn repositories(var: &'static str, value: String) -> Result<Vec<RepoName>, ConfigError> {
    let mut repos: Vec<RepoName> = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let repo = parse::<RepoName>(var, part.to_string())?;
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }
    Ok(repos)
}
