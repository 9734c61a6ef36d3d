//! Client-facing API — the OpenAI-compatible surface callers talk to.
//!
//! Handlers are a thin translation layer: estimate tokens, select a
//! preferred backend, admit it (starting/preempting as needed), proxy the
//! request, and record the outcome. All policy lives in
//! [`crate::selector`] and [`crate::controller`].

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::api::client_auth::role_of;
use crate::auth::Role;
use crate::config::Kind;
use crate::controller;
use crate::error::AdmitError;
use crate::estimator;
use crate::selector;
use crate::state::RouterState;
use crate::traffic::DecisionEntry;

/// Build the client-facing axum router.
///
/// `/healthz` is merged in *after* the auth middleware is applied to the
/// proxied routes via `route_layer`, so it never requires a bearer token —
/// `Router::layer` wraps every route already present on the router it's
/// called on, and a route added post-hoc to the whole thing would still be
/// caught by a plain `.layer()` here.
pub fn router(state: Arc<RouterState>) -> Router {
    let protected = Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/rerank", post(rerank))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::api::client_auth::client_auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .merge(protected)
        .with_state(state)
}

/// GET /v1/models — one entry per distinct model name in the registry.
async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let mut seen = std::collections::HashSet::new();
    let data: Vec<Value> = state
        .config
        .registry
        .backends
        .iter()
        .filter(|b| seen.insert(b.model.clone()))
        .map(|b| json!({ "id": b.model, "object": "model" }))
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

async fn chat_completions(State(state): State<Arc<RouterState>>, req: Request) -> Response {
    handle_request(&state, req, Kind::Chat).await
}

async fn embeddings(State(state): State<Arc<RouterState>>, req: Request) -> Response {
    handle_request(&state, req, Kind::Embeddings).await
}

async fn rerank(State(state): State<Arc<RouterState>>, req: Request) -> Response {
    handle_request(&state, req, Kind::Rerank).await
}

/// Shared admission+proxy flow for all three proxied endpoints. They differ
/// only in which upstream path the body gets forwarded to (`Kind`) and
/// whether a token estimate is meaningful (`chat` only).
async fn handle_request(state: &Arc<RouterState>, req: Request, kind: Kind) -> Response {
    let role = role_of(&req);
    let headers = req.headers().clone();
    let body = match axum::body::to_bytes(req.into_body(), 16 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": "body too large or unreadable", "type": "invalid_request" } })),
            )
                .into_response();
        }
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": "invalid JSON body", "type": "invalid_request" } })),
            )
                .into_response();
        }
    };

    let model = match payload.get("model").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => return AdmitError::UnknownModel("<missing `model` field>".to_string()).into_response(),
    };

    let estimated_tokens = match kind {
        Kind::Chat => Some(estimator::estimate_tokens(&payload)),
        Kind::Embeddings | Kind::Rerank => None,
    };

    let start = Instant::now();
    let (outcome_str, backend, error_str, response) =
        admit_and_proxy(state, &model, estimated_tokens, role, kind, &headers, body).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let mut entry = DecisionEntry::new(&model, role.as_str(), outcome_str, latency_ms);
    if let Some(b) = &backend {
        entry = entry.with_backend(b);
    }
    if let Some(err) = &error_str {
        entry = entry.with_error(err);
    }
    state.decisions.push(entry);

    response
}

/// Runs selection, admission, and proxying, returning a tuple of
/// `(outcome label, backend id if chosen, error message if any, final response)`
/// so the caller can both log the decision and return the response in one pass.
async fn admit_and_proxy(
    state: &Arc<RouterState>,
    model: &str,
    estimated_tokens: Option<u64>,
    role: Role,
    kind: Kind,
    headers: &HeaderMap,
    body: Bytes,
) -> (&'static str, Option<String>, Option<String>, Response) {
    let preferred = match selector::select(state, model, estimated_tokens, Some(role)) {
        Ok(id) => id,
        Err(e) => return ("rejected", None, Some(e.to_string()), e.into_response()),
    };

    let backend_id = match controller::admit_with_fallback(state, model, &preferred, role, &state.prober).await {
        Ok(id) => id,
        Err(e) => return ("rejected", None, Some(e.to_string()), e.into_response()),
    };

    match crate::proxy::forward(state, &backend_id, kind, headers, body).await {
        Ok(resp) => ("admitted", Some(backend_id), None, resp),
        Err(e) => ("proxy_failed", Some(backend_id), Some(e.to_string()), e.into_response()),
    }
}
