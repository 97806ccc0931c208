//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! `MessageId` where a `ChannelId` is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Discord channel snowflake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(n: u64) -> Self {
        ChannelId(n)
    }
}

/// A Discord message snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        MessageId(n)
    }
}

/// The location of one delivered message: which channel, which message.
///
/// Deleting a notification needs both halves, so they always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageHandle {
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        MessageHandle {
            channel_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// A repository's full name, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoName {
    owner: String,
    name: String,
}

/// Error returned when a repository name is not `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository {input:?}: expected \"owner/name\"")]
pub struct InvalidRepoName {
    pub input: String,
}

impl RepoName {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoName {
    type Err = InvalidRepoName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRepoName {
            input: s.to_string(),
        };
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(RepoName {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

/// Error returned when an entity key string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity key {input:?}: expected \"owner/repo#number\"")]
pub struct InvalidEntityKey {
    pub input: String,
}

/// Identity of a tracked pull request: `{repo}#{number}`.
///
/// `repo` is the repository's full name (`owner/name`). The string form is
/// the key format of the persisted registry, so it serializes as a plain
/// string rather than a struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub repo: String,
    pub number: u64,
}

impl EntityKey {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        EntityKey {
            repo: repo.into(),
            number,
        }
    }

    /// Splits the repository full name into `(owner, name)`.
    ///
    /// Returns `None` if the full name has no `/` or either half is empty.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.repo.split_once('/')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some((owner, name))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

impl FromStr for EntityKey {
    type Err = InvalidEntityKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEntityKey {
            input: s.to_string(),
        };
        let (repo, number) = s.rsplit_once('#').ok_or_else(invalid)?;
        if repo.is_empty() {
            return Err(invalid());
        }
        let number = number.parse().map_err(|_| invalid())?;
        Ok(EntityKey::new(repo, number))
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
