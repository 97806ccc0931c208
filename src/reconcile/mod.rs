//! Lifecycle reconciliation.
//!
//! A reconciliation pass walks a snapshot of the registry and asks the source
//! platform about every tracked entity:
//!
//! ```text
//! TRACKED ─query─┬─ still open ──► no action, stays TRACKED
//!                ├─ closed ──────► delete messages ─► remove key (untracked)
//!                └─ query failed ► no action, error counted, retried next pass
//! ```
//!
//! Passes are idempotent and start from durable registry state, so an entity
//! that closed while the relay was down is cleaned up by the next pass.
//! Failures are isolated per entity; a pass always visits the whole snapshot
//! unless shutdown is requested, in which case it stops between entities.
//!
//! Passes are single-flight: [`Reconciler::reconcile`] waits for a running
//! pass, the periodic loop skips a tick instead.

mod purge;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::delivery::Deliverer;
use crate::discord::MessagingPlatform;
use crate::github::{EntityStateSource, GitHubErrorKind};
use crate::registry::NotificationRegistry;
use crate::types::EntityKey;

pub use purge::{PurgeError, PurgeReport};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities whose state was queried.
    pub checked: usize,
    /// Entities whose notifications were deleted and whose keys were removed.
    pub removed: usize,
    /// Entities left tracked because a query, delete or registry write failed.
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityOutcome {
    StillOpen,
    Removed,
    /// Untracked by someone else between snapshot and lock.
    Gone,
    Failed,
}

pub struct Reconciler<P, S> {
    registry: Arc<NotificationRegistry>,
    deliverer: Deliverer<P>,
    source: Arc<S>,
    pass: Mutex<()>,
}

impl<P: MessagingPlatform, S: EntityStateSource> Reconciler<P, S> {
    pub fn new(registry: Arc<NotificationRegistry>, deliverer: Deliverer<P>, source: Arc<S>) -> Self {
        Reconciler {
            registry,
            deliverer,
            source,
            pass: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<NotificationRegistry> {
        &self.registry
    }

    /// Runs one full pass, waiting for any pass already in progress.
    pub async fn reconcile(&self) -> ReconcileReport {
        let _pass = self.pass.lock().await;
        self.run_pass(&CancellationToken::new()).await
    }

    /// Runs one pass unless another is in progress.
    pub async fn try_reconcile(&self, shutdown: &CancellationToken) -> Option<ReconcileReport> {
        let Ok(_pass) = self.pass.try_lock() else {
            debug!("Reconciliation pass already running, skipping");
            return None;
        };
        Some(self.run_pass(shutdown).await)
    }

    /// Reconciles at startup and then every `interval` until `shutdown`.
    #[instrument(skip_all, fields(interval_secs = interval.as_secs()))]
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!("Reconciler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping reconciler");
                    break;
                }
                // The first tick completes immediately: the startup pass.
                _ = ticker.tick() => {
                    if let Some(report) = self.try_reconcile(&shutdown).await {
                        info!(
                            checked = report.checked,
                            removed = report.removed,
                            errors = report.errors,
                            "Reconciliation pass finished"
                        );
                    }
                }
            }
        }
    }

    async fn run_pass(&self, shutdown: &CancellationToken) -> ReconcileReport {
        let snapshot = self.registry.all();
        let mut report = ReconcileReport::default();
        debug!(tracked = snapshot.len(), "Starting reconciliation pass");

        for key in snapshot.keys() {
            if shutdown.is_cancelled() {
                info!(checked = report.checked, "Reconciliation interrupted by shutdown");
                break;
            }
            match self.reconcile_entity(key).await {
                EntityOutcome::StillOpen => report.checked += 1,
                EntityOutcome::Removed => {
                    report.checked += 1;
                    report.removed += 1;
                }
                EntityOutcome::Failed => {
                    report.checked += 1;
                    report.errors += 1;
                }
                EntityOutcome::Gone => {}
            }
        }
        report
    }

    async fn reconcile_entity(&self, key: &EntityKey) -> EntityOutcome {
        let _guard = self.registry.lock_key(key).await;
        let Some(entry) = self.registry.get(key) else {
            return EntityOutcome::Gone;
        };

        let state = match self.source.entity_state(key).await {
            Ok(state) => state,
            Err(e) => {
                if e.kind == GitHubErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Tracked entity not found, keeping it for now");
                } else {
                    warn!(key = %key, error = %e, "Entity state query failed");
                }
                return EntityOutcome::Failed;
            }
        };
        if !state.is_closed {
            return EntityOutcome::StillOpen;
        }

        let failed = self.deliverer.delete_all(&entry.handles).await;
        if failed.is_empty() {
            match self.registry.remove(key).await {
                Ok(_) => {
                    info!(key = %key, merged = state.merged, handles = entry.handles.len(), "Retracted notification of closed entity");
                    EntityOutcome::Removed
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to untrack closed entity");
                    EntityOutcome::Failed
                }
            }
        } else {
            // Keep only what is still out there.
            if let Err(e) = self.registry.set_handles(key, failed).await {
                error!(key = %key, error = %e, "Failed to record remaining handles");
            }
            EntityOutcome::Failed
        }
    }
}
