//! Core identifier types shared by every component.

pub mod ids;

pub use ids::{ChannelId, EntityKey, InvalidEntityKey, InvalidRepoName, MessageHandle, MessageId, RepoName};
