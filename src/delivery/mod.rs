//! Notification delivery.
//!
//! [`Deliverer`] sends a chunk sequence to one channel, strictly in order:
//! chunk `i + 1` is only attempted once chunk `i`'s attempt has finished.
//! Delivery never returns an error. The caller gets a [`DeliveryReport`]
//! listing every handle that made it, so a partially delivered notification
//! can still be tracked and later retracted.
//!
//! # Failure handling
//!
//! - Rate limits are retried per [`RetryConfig`], honoring the server hint.
//! - A permanent failure (forbidden, unknown channel) abandons the remaining
//!   chunks. Any other failure skips only that chunk.
//! - After any failure, one diagnostic notice goes to the bot-logs channel,
//!   unless the failing channel *is* bot-logs or bot-logs is unconfigured.
//!   The notice is a single attempt; its own failure is only logged. Other
//!   components post their own notices through
//!   [`Deliverer::notify_bot_logs`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::discord::{MessagingPlatform, PlatformError, PlatformErrorKind, RetryConfig, retry_rate_limited};
use crate::format::NotificationChunk;
use crate::routing::ChannelRouter;
use crate::types::{ChannelId, MessageHandle};

/// What happened to the bot-logs notice after a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// Every chunk was delivered.
    NotNeeded,
    /// The failing channel was bot-logs itself, or bot-logs is unconfigured.
    Skipped,
    Sent(MessageHandle),
    Failed(PlatformError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub channel: ChannelId,

    /// Handles of delivered chunks, in chunk order.
    pub handles: Vec<MessageHandle>,

    /// Number of chunks in the notification.
    pub chunk_count: usize,

    /// The first failure, if any chunk failed.
    pub failure: Option<PlatformError>,

    pub fallback: FallbackOutcome,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.handles.len() == self.chunk_count
    }

    pub fn is_partial(&self) -> bool {
        !self.handles.is_empty() && self.handles.len() < self.chunk_count
    }
}

/// Sends and deletes notifications on a [`MessagingPlatform`].
pub struct Deliverer<P> {
    platform: Arc<P>,
    router: ChannelRouter,
    retry: RetryConfig,
}

impl<P> Clone for Deliverer<P> {
    fn clone(&self) -> Self {
        Deliverer {
            platform: Arc::clone(&self.platform),
            router: self.router.clone(),
            retry: self.retry,
        }
    }
}

impl<P: MessagingPlatform> Deliverer<P> {
    pub fn new(platform: Arc<P>, router: ChannelRouter) -> Self {
        Deliverer {
            platform,
            router,
            retry: RetryConfig::DEFAULT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Delivers `chunks` to `channel` in order, falling back to bot-logs once
    /// on failure.
    pub async fn deliver(&self, channel: ChannelId, chunks: &[NotificationChunk]) -> DeliveryReport {
        let mut handles = Vec::with_capacity(chunks.len());
        let mut failure: Option<PlatformError> = None;

        for (index, chunk) in chunks.iter().enumerate() {
            match self.send_with_retry(channel, chunk).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(
                        channel = %channel,
                        chunk = index + 1,
                        of = chunks.len(),
                        error = %e,
                        "Chunk delivery failed"
                    );
                    let abandon = e.kind == PlatformErrorKind::Permanent
                        || e.kind == PlatformErrorKind::NotFound;
                    failure.get_or_insert(e);
                    if abandon {
                        break;
                    }
                }
            }
        }

        let fallback = match &failure {
            None => FallbackOutcome::NotNeeded,
            Some(e) => self.fallback(channel, e).await,
        };

        debug!(
            channel = %channel,
            delivered = handles.len(),
            chunks = chunks.len(),
            "Delivery finished"
        );
        DeliveryReport {
            channel,
            handles,
            chunk_count: chunks.len(),
            failure,
            fallback,
        }
    }

    /// Replaces the content of a message in place.
    pub async fn edit(&self, handle: MessageHandle, chunk: &NotificationChunk) -> Result<(), PlatformError> {
        retry_rate_limited(self.retry, || self.platform.edit_message(handle, chunk))
            .await
            .into_result()
    }

    pub async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        retry_rate_limited(self.retry, || self.platform.rename_channel(channel, name))
            .await
            .into_result()
    }

    /// Deletes one message. Already-deleted messages count as success.
    pub async fn delete(&self, handle: MessageHandle) -> Result<(), PlatformError> {
        let result = retry_rate_limited(self.retry, || self.platform.delete_message(handle))
            .await
            .into_result();
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(handle = %handle, "Message already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes every handle, returning the ones that could not be deleted.
    pub async fn delete_all(&self, handles: &[MessageHandle]) -> Vec<MessageHandle> {
        let mut failed = Vec::new();
        for &handle in handles {
            if let Err(e) = self.delete(handle).await {
                warn!(handle = %handle, error = %e, "Failed to delete message");
                failed.push(handle);
            }
        }
        failed
    }

    async fn send_with_retry(
        &self,
        channel: ChannelId,
        chunk: &NotificationChunk,
    ) -> Result<MessageHandle, PlatformError> {
        retry_rate_limited(self.retry, || self.platform.send_message(channel, chunk))
            .await
            .into_result()
    }

    async fn fallback(&self, channel: ChannelId, reason: &PlatformError) -> FallbackOutcome {
        let notice = NotificationChunk::notice(
            "Delivery failure",
            format!("failed to deliver to {channel}: {reason}"),
        );
        self.notify_bot_logs(channel, &notice).await
    }

    /// Posts a diagnostic notice about `origin` to bot-logs, once.
    ///
    /// Skipped when bot-logs is unconfigured or is `origin` itself.
    pub async fn notify_bot_logs(&self, origin: ChannelId, notice: &NotificationChunk) -> FallbackOutcome {
        let Some(bot_logs) = self.router.bot_logs() else {
            error!(channel = %origin, notice = %notice.title, "No bot-logs channel is configured for a diagnostic notice");
            return FallbackOutcome::Skipped;
        };
        if bot_logs == origin {
            error!(channel = %origin, notice = %notice.title, "Diagnostic notice about bot-logs itself not posted");
            return FallbackOutcome::Skipped;
        }

        match self.platform.send_message(bot_logs, notice).await {
            Ok(handle) => {
                info!(channel = %origin, bot_logs = %bot_logs, notice = %notice.title, "Posted diagnostic notice to bot-logs");
                FallbackOutcome::Sent(handle)
            }
            Err(e) => {
                error!(channel = %origin, error = %e, "Diagnostic notice to bot-logs failed");
                FallbackOutcome::Failed(e)
            }
        }
    }
}
