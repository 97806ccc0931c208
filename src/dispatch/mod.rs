//! Event dispatch.
//!
//! Each accepted [`Event`] runs one pipeline:
//!
//! ```text
//! relevance ─► classify ─► resolve ─► format ─► deliver ─► registry (track / retract)
//! ```
//!
//! Pipelines for different events run concurrently on a [`JoinSet`]; chunks
//! within one notification are still delivered sequentially by the
//! [`Deliverer`]. Registry updates for a tracked entity happen under that
//! entity's key lock, which is held across its delivery so that two events for
//! the same pull request cannot interleave their track/retract steps.
//!
//! On shutdown the dispatcher stops taking new events but still dispatches
//! every event already queued, since each of those was acknowledged as
//! accepted.

mod backfill;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::delivery::{Deliverer, DeliveryReport};
use crate::discord::MessagingPlatform;
use crate::format::{self, NotificationChunk, PlatformLimits};
use crate::registry::NotificationRegistry;
use crate::types::{ChannelId, EntityKey};
use crate::webhooks::{Event, Lifecycle, classify, is_relevant};

pub use backfill::BackfillReport;

/// What became of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Filtered as noise; nothing was sent.
    Skipped,
    /// Neither the target channel nor bot-logs is configured.
    Unroutable,
    Delivered(DeliveryReport),
}

pub struct Dispatcher<P> {
    deliverer: Deliverer<P>,
    registry: Arc<NotificationRegistry>,
    limits: PlatformLimits,
}

impl<P: MessagingPlatform> Dispatcher<P> {
    pub fn new(
        deliverer: Deliverer<P>,
        registry: Arc<NotificationRegistry>,
        limits: PlatformLimits,
    ) -> Self {
        Dispatcher {
            deliverer,
            registry,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<NotificationRegistry> {
        &self.registry
    }

    /// Runs the full pipeline for one event. Never fails; every problem is
    /// logged and reflected in the outcome.
    #[instrument(skip_all, fields(event = %event.event_type, delivery = ?event.delivery_id))]
    pub async fn dispatch(&self, event: &Event) -> DispatchOutcome {
        if !is_relevant(&event.event_type, &event.payload) {
            debug!(action = ?event.payload().action(), "Skipping irrelevant event");
            return DispatchOutcome::Skipped;
        }

        let decision = classify(&event.event_type, &event.payload);
        let router = self.deliverer.router();
        let Some(channel) = router.resolve(decision.channel_key).channel() else {
            return DispatchOutcome::Unroutable;
        };
        let chunks = format::format(
            decision.formatter,
            &event.event_type,
            &event.payload,
            &self.limits,
        );

        let report = match &decision.lifecycle {
            Lifecycle::Untracked => self.deliverer.deliver(channel, &chunks).await,
            Lifecycle::Track(key) => self.deliver_tracked(key, channel, &chunks).await,
            Lifecycle::Retract(key) => self.deliver_and_retract(key, channel, &chunks).await,
        };

        info!(
            channel = %channel,
            key = %decision.channel_key,
            delivered = report.handles.len(),
            chunks = report.chunk_count,
            "Dispatched event"
        );
        DispatchOutcome::Delivered(report)
    }

    /// Delivers and records the handles under `key`, replacing any earlier
    /// notification for the same entity.
    async fn deliver_tracked(
        &self,
        key: &EntityKey,
        channel: ChannelId,
        chunks: &[NotificationChunk],
    ) -> DeliveryReport {
        let _guard = self.registry.lock_key(key).await;
        let report = self.deliverer.deliver(channel, chunks).await;
        if report.handles.is_empty() {
            return report;
        }

        let mut handles = report.handles.clone();
        if let Some(previous) = self.registry.get(key) {
            // Anything we fail to delete stays on record for the reconciler.
            let leftover = self.deliverer.delete_all(&previous.handles).await;
            debug!(key = %key, superseded = previous.handles.len(), leftover = leftover.len(), "Replaced tracked notification");
            handles.extend(leftover);
        }

        if let Err(e) = self.registry.put(key.clone(), handles).await {
            // Delivered but untracked: nothing will ever retract it.
            error!(key = %key, error = %e, "Failed to record delivered notification");
            let notice = NotificationChunk::notice(
                "Tracking failure",
                format!("delivered {key} to {channel} but could not track it, it will not be retracted: {e}"),
            );
            self.deliverer.notify_bot_logs(channel, &notice).await;
        }
        report
    }

    /// Delivers the closing notification and retracts the tracked one.
    async fn deliver_and_retract(
        &self,
        key: &EntityKey,
        channel: ChannelId,
        chunks: &[NotificationChunk],
    ) -> DeliveryReport {
        let _guard = self.registry.lock_key(key).await;
        let report = self.deliverer.deliver(channel, chunks).await;

        let Some(tracked) = self.registry.get(key) else {
            return report;
        };
        let failed = self.deliverer.delete_all(&tracked.handles).await;
        let result = if failed.is_empty() {
            self.registry.remove(key).await.map(|_| ())
        } else {
            warn!(key = %key, remaining = failed.len(), "Some messages of a closed entity could not be deleted");
            self.registry.set_handles(key, failed).await
        };
        match result {
            Ok(()) => info!(key = %key, "Retracted notification of closed entity"),
            Err(e) => error!(key = %key, error = %e, "Failed to untrack closed entity"),
        }
        report
    }

    /// Consumes events until the channel closes or `shutdown` fires, then
    /// dispatches whatever is still queued and waits for in-flight pipelines.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();
        info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Dispatch task panicked");
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Event channel closed");
                        break;
                    };
                    self.spawn_dispatch(&mut tasks, event);
                }
            }
        }

        events.close();
        let mut drained = 0usize;
        while let Some(event) = events.recv().await {
            self.spawn_dispatch(&mut tasks, event);
            drained += 1;
        }

        info!(in_flight = tasks.len(), drained, "Dispatcher stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch task panicked");
            }
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, tasks: &mut JoinSet<DispatchOutcome>, event: Event) {
        let dispatcher = Arc::clone(self);
        tasks.spawn(async move { dispatcher.dispatch(&event).await });
    }
}
