//! Destination messaging platform.
//!
//! [`MessagingPlatform`] is the seam between delivery and the network: the
//! production implementation is [`DiscordClient`], tests use an in-memory
//! mock. Implementations report raw outcomes; retry and fallback policy live
//! in the delivery layer.

pub mod client;
pub mod error;
pub mod retry;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::format::NotificationChunk;
use crate::types::{ChannelId, MessageHandle, MessageId};

pub use client::DiscordClient;
pub use error::{PlatformError, PlatformErrorKind};
pub use retry::{RetryConfig, RetryResult, retry_rate_limited};

/// Largest page `list_messages` may request.
pub const MAX_PAGE_SIZE: u8 = 100;

/// A message as seen when listing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
}

/// Operations the relay needs from the destination platform.
pub trait MessagingPlatform: Send + Sync + 'static {
    /// Posts one chunk, returning its handle.
    fn send_message(
        &self,
        channel: ChannelId,
        chunk: &NotificationChunk,
    ) -> impl Future<Output = Result<MessageHandle, PlatformError>> + Send;

    /// Replaces a message's content. A missing message surfaces as
    /// [`PlatformErrorKind::NotFound`].
    fn edit_message(
        &self,
        handle: MessageHandle,
        chunk: &NotificationChunk,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Deletes a message. A missing message surfaces as
    /// [`PlatformErrorKind::NotFound`]; callers decide what that means.
    fn delete_message(
        &self,
        handle: MessageHandle,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Lists up to `limit` messages, newest first, strictly older than
    /// `before` when given.
    fn list_messages(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> impl Future<Output = Result<Vec<ChannelMessage>, PlatformError>> + Send;

    fn rename_channel(
        &self,
        channel: ChannelId,
        name: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}
