//! Channel purges.
//!
//! Two explicit operations, neither part of the periodic pass:
//!
//! - [`Reconciler::purge_channel`] deletes every message in a channel and
//!   forgets every registry handle that pointed there. Operator-invoked only.
//! - [`Reconciler::purge_older_than`] deletes messages past a retention age
//!   and forgets the handles it deleted. Run once at startup.
//!
//! Both take the reconciliation pass lock, so they never overlap a pass.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::Reconciler;
use crate::discord::{ChannelMessage, MAX_PAGE_SIZE, MessagingPlatform, PlatformError};
use crate::github::EntityStateSource;
use crate::registry::RegistryError;
use crate::types::{ChannelId, EntityKey, MessageHandle};

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("failed to list channel messages: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub channel: ChannelId,
    /// Messages seen in the channel.
    pub listed: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Registry keys left without any handle and removed.
    pub untracked: Vec<EntityKey>,
}

impl<P: MessagingPlatform, S: EntityStateSource> Reconciler<P, S> {
    /// Deletes every message in `channel` and untracks everything posted there.
    pub async fn purge_channel(&self, channel: ChannelId) -> Result<PurgeReport, PurgeError> {
        let _pass = self.pass.lock().await;
        let messages = self.list_all(channel).await?;
        let (mut report, _) = self.delete_messages(channel, &messages).await;

        report.untracked = self
            .registry
            .retain_handles(|h| h.channel_id != channel)
            .await?;
        info!(
            channel = %channel,
            deleted = report.deleted,
            failed = report.failed,
            untracked = report.untracked.len(),
            "Purged channel"
        );
        Ok(report)
    }

    /// Deletes messages in `channel` older than `max_age`.
    pub async fn purge_older_than(
        &self,
        channel: ChannelId,
        max_age: Duration,
    ) -> Result<PurgeReport, PurgeError> {
        let _pass = self.pass.lock().await;
        let cutoff = Utc::now() - max_age;
        let messages = self.list_all(channel).await?;
        let listed = messages.len();
        let old: Vec<_> = messages
            .into_iter()
            .filter(|m| m.timestamp < cutoff)
            .collect();

        let (mut report, deleted) = self.delete_messages(channel, &old).await;
        report.listed = listed;

        // Handles whose delete failed stay tracked for the reconciler.
        report.untracked = self
            .registry
            .retain_handles(|h| !deleted.contains(h))
            .await?;

        info!(
            channel = %channel,
            max_age_days = max_age.num_days(),
            deleted = report.deleted,
            failed = report.failed,
            "Purged old messages"
        );
        Ok(report)
    }

    /// Pages backwards through the whole channel.
    async fn list_all(&self, channel: ChannelId) -> Result<Vec<ChannelMessage>, PlatformError> {
        let platform = self.deliverer.platform();
        let mut all = Vec::new();
        let mut before = None;

        loop {
            let page = platform.list_messages(channel, before, MAX_PAGE_SIZE).await?;
            let done = page.len() < usize::from(MAX_PAGE_SIZE);
            before = page.iter().map(|m| m.id).min();
            all.extend(page);
            if done || before.is_none() {
                return Ok(all);
            }
        }
    }

    /// Deletes `messages`, returning the counts and the handles that are gone.
    async fn delete_messages(
        &self,
        channel: ChannelId,
        messages: &[ChannelMessage],
    ) -> (PurgeReport, HashSet<MessageHandle>) {
        let mut report = PurgeReport {
            channel,
            listed: messages.len(),
            ..PurgeReport::default()
        };
        let mut deleted = HashSet::with_capacity(messages.len());
        for message in messages {
            let handle = MessageHandle::new(channel, message.id);
            match self.deliverer.delete(handle).await {
                Ok(()) => {
                    report.deleted += 1;
                    deleted.insert(handle);
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to delete message during purge");
                    report.failed += 1;
                }
            }
        }
        (report, deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Deliverer;
    use crate::registry::NotificationRegistry;
    use crate::routing::{ChannelMap, ChannelRouter};
    use crate::test_utils::{MockPlatform, MockSource};
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    const COMMITS: ChannelId = ChannelId(1);
    const REQUESTS: ChannelId = ChannelId(2);

    fn reconciler() -> (TempDir, Arc<MockPlatform>, Reconciler<MockPlatform, MockSource>) {
        let dir = tempdir().unwrap();
        let registry =
            Arc::new(NotificationRegistry::open(dir.path().join("notification_registry.json")).unwrap());
        let platform = Arc::new(MockPlatform::new());
        let deliverer = Deliverer::new(Arc::clone(&platform), ChannelRouter::new(ChannelMap::new()));
        let reconciler = Reconciler::new(registry, deliverer, Arc::new(MockSource::new()));
        (dir, platform, reconciler)
    }

    #[tokio::test]
    async fn purge_channel_deletes_everything_across_pages() {
        let (_dir, platform, reconciler) = reconciler();
        for _ in 0..250 {
            platform.seed_message(COMMITS, Utc::now());
        }
        let other = platform.seed_message(REQUESTS, Utc::now());

        let report = reconciler.purge_channel(COMMITS).await.unwrap();

        assert_eq!(report.listed, 250);
        assert_eq!(report.deleted, 250);
        assert!(platform.messages_in(COMMITS).is_empty());
        assert_eq!(platform.messages_in(REQUESTS), vec![other.message_id]);
    }

    #[tokio::test]
    async fn purge_channel_untracks_its_entries() {
        let (_dir, platform, reconciler) = reconciler();
        let in_requests = platform.seed_message(REQUESTS, Utc::now());
        let in_commits = platform.seed_message(COMMITS, Utc::now());
        let registry = reconciler.registry();
        registry.put(EntityKey::new("o/r", 1), vec![in_requests]).await.unwrap();
        registry.put(EntityKey::new("o/r", 2), vec![in_commits]).await.unwrap();

        let report = reconciler.purge_channel(REQUESTS).await.unwrap();

        assert_eq!(report.untracked, vec![EntityKey::new("o/r", 1)]);
        assert!(registry.contains(&EntityKey::new("o/r", 2)));
    }

    #[tokio::test]
    async fn retention_purge_keeps_recent_messages() {
        let (_dir, platform, reconciler) = reconciler();
        let old = platform.seed_message(REQUESTS, Utc::now() - Duration::days(45));
        let recent = platform.seed_message(REQUESTS, Utc::now() - Duration::days(2));
        reconciler
            .registry()
            .put(EntityKey::new("o/r", 1), vec![old])
            .await
            .unwrap();
        reconciler
            .registry()
            .put(EntityKey::new("o/r", 2), vec![recent])
            .await
            .unwrap();

        let report = reconciler
            .purge_older_than(REQUESTS, Duration::days(30))
            .await
            .unwrap();

        assert_eq!(report.listed, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(platform.messages_in(REQUESTS), vec![recent.message_id]);
        assert_eq!(report.untracked, vec![EntityKey::new("o/r", 1)]);
        assert!(reconciler.registry().contains(&EntityKey::new("o/r", 2)));
    }

    #[tokio::test]
    async fn retention_purge_keeps_tracking_undeleted_messages() {
        let (_dir, platform, reconciler) = reconciler();
        let stuck = platform.seed_message(REQUESTS, Utc::now() - Duration::days(45));
        let gone = platform.seed_message(REQUESTS, Utc::now() - Duration::days(40));
        let registry = reconciler.registry();
        registry.put(EntityKey::new("o/r", 7), vec![stuck]).await.unwrap();
        registry.put(EntityKey::new("o/r", 8), vec![gone]).await.unwrap();
        platform.fail_deletes_of(stuck, PlatformError::transient("502 Bad Gateway"));

        let report = reconciler
            .purge_older_than(REQUESTS, Duration::days(30))
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.untracked, vec![EntityKey::new("o/r", 8)]);
        assert_eq!(platform.messages_in(REQUESTS), vec![stuck.message_id]);
        assert_eq!(registry.get(&EntityKey::new("o/r", 7)).unwrap().handles, vec![stuck]);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let (_dir, platform, reconciler) = reconciler();
        platform.fail_lists_of(COMMITS, PlatformError::permanent("Missing Access"));

        let err = reconciler.purge_channel(COMMITS).await.unwrap_err();
        assert!(matches!(err, PurgeError::Platform(_)));
    }
}
