//! HTTP server for the webhook relay.
//!
//! # Endpoints
//!
//! - `POST /github` (alias `POST /webhook`) - Accepts GitHub webhook deliveries (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::webhooks::{Event, WebhookSecret};

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// `None` disables signature checks.
    secret: Option<WebhookSecret>,

    /// Queue feeding the dispatcher.
    events: mpsc::Sender<Event>,
}

impl AppState {
    pub fn new(secret: Option<WebhookSecret>, events: mpsc::Sender<Event>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { secret, events }),
        }
    }

    pub fn secret(&self) -> Option<&WebhookSecret> {
        self.inner.secret.as_ref()
    }

    pub fn events(&self) -> &mpsc::Sender<Event> {
        &self.inner.events
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/github", post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
