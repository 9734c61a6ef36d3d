//! Liveness probe endpoint shared across both listeners.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /healthz` — always returns 200 OK with `{"ok": true, "ts": <unix seconds>}`.
///
/// Unauthenticated, no dependencies, never blocks — safe as a container
/// liveness probe.
pub async fn healthz() -> impl IntoResponse {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (StatusCode::OK, Json(json!({ "ok": true, "ts": ts })))
}
