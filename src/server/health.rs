//! Liveness endpoint.

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Returns 200 with `{"status":"ok"}` while the server is accepting connections.
pub async fn health_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
