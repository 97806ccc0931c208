//! Webhook endpoint handler.
//!
//! Authenticates a delivery, parses it into an [`Event`] and hands it to the
//! dispatcher queue. The response never depends on downstream delivery: once
//! a delivery is authenticated and well-formed it is acknowledged with 202.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::webhooks::{Event, SignatureError, is_relevant, verify_delivery};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The dispatcher has stopped; the process is shutting down.
    #[error("event queue closed")]
    QueueClosed,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Webhook handler for `POST /github` and `POST /webhook`.
///
/// # Request
///
/// - `X-GitHub-Event` (required): event type, e.g. "pull_request"
/// - `X-GitHub-Delivery` (optional): delivery id, used for log correlation
/// - `X-Hub-Signature-256`: `sha256=<hex>`, required when a secret is configured
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 202 `{"status":"accepted"}`: queued for dispatch
/// - 202 `{"status":"skipped"}`: a filtered action, nothing will be posted
/// - 400: missing event header or invalid JSON
/// - 401: missing or invalid signature
/// - 503: shutting down
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), WebhookError> {
    let delivery_id = header(&headers, HEADER_DELIVERY);

    // Authenticate before looking at anything else in the request.
    if let Err(e) = verify_delivery(
        app_state.secret(),
        &body,
        header(&headers, HEADER_SIGNATURE),
    ) {
        warn!(delivery_id = ?delivery_id, error = %e, "Rejected webhook");
        return Err(e.into());
    }

    let event_type = header(&headers, HEADER_EVENT).ok_or(WebhookError::MissingHeader(HEADER_EVENT))?;
    let payload: Value = serde_json::from_slice(&body)?;

    debug!(delivery_id = ?delivery_id, event_type = %event_type, "Received webhook");

    if !is_relevant(event_type, &payload) {
        debug!(delivery_id = ?delivery_id, event_type = %event_type, "Skipped filtered action");
        return Ok((StatusCode::ACCEPTED, Json(json!({ "status": "skipped" }))));
    }

    let mut event = Event::new(event_type, payload);
    if let Some(id) = delivery_id {
        event = event.with_delivery_id(id);
    }
    app_state
        .events()
        .send(event)
        .await
        .map_err(|_| WebhookError::QueueClosed)?;

    info!(delivery_id = ?delivery_id, event_type = %event_type, "Webhook accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// Reads a header as UTF-8, treating unreadable values as absent.
fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
