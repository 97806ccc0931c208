//! Webhook Relay - routes GitHub webhook events to Discord channels.
//!
//! Each event is classified, routed to a channel, formatted into one or more
//! embed-sized chunks and delivered in order. Pull request notifications are
//! tracked in a durable registry and retracted once the pull request closes,
//! either immediately on the closing event or by the periodic reconciler.
//! Per-repository counts are kept current in the overview channels.

pub mod config;
pub mod delivery;
pub mod discord;
pub mod dispatch;
pub mod format;
pub mod github;
pub mod reconcile;
pub mod registry;
pub mod routing;
pub mod server;
pub mod stats;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;
