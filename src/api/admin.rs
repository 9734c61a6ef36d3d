//! Admin API — operator-facing introspection endpoints.
//!
//! Served on a separate listener from the client API so it can be
//! network-restricted independently (e.g. reachable only from inside the
//! host, never exposed publicly).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::state::RouterState;

/// Build the admin-facing axum router.
///
/// `/admin/healthz` is merged in after the auth middleware is applied to the
/// other admin routes via `route_layer`, so it stays reachable without a
/// token even when `GFR_ADMIN_TOKEN` is set — see the matching note on
/// `api::client::router`.
pub fn router(state: Arc<RouterState>) -> Router {
    let protected = Router::new()
        .route("/admin/registry", get(registry))
        .route("/admin/backends", get(backends))
        .route("/admin/decisions", get(decisions))
        .route("/metrics", get(crate::api::metrics::metrics))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::api::admin_auth::admin_auth_middleware,
        ));

    Router::new()
        .route("/admin/healthz", get(crate::api::health::healthz))
        .merge(protected)
        .with_state(state)
}

/// GET /admin/registry — the static registry, as configured.
async fn registry(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let backends: Vec<_> = state
        .config
        .registry
        .backends
        .iter()
        .map(|b| {
            json!({
                "id": b.id(),
                "model": b.model,
                "kind": b.kind,
                "gpu": b.gpu.as_str(),
                "strategy": b.strategy,
                "base_url": b.base_url,
                "container_name": b.container_name,
                "cap": state.config.registry.cap_for(&b.model),
            })
        })
        .collect();

    Json(json!({ "backends": backends }))
}

/// GET /admin/backends — live per-backend state. Only reads atomics and a
/// best-effort snapshot of each GPU's sticky backend; never blocks on
/// `start_lock`/`gpu_lock`.
async fn backends(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let now = state.monotonic_now_secs();

    let backends: Vec<_> = state
        .config
        .registry
        .backends
        .iter()
        .map(|spec| {
            let id = spec.id();
            let backend_state = state.backend(&id);
            let ever_used = backend_state.map(|b| b.was_ever_used()).unwrap_or(false);
            let last_used = backend_state.map(|b| b.last_used_secs()).unwrap_or(0);
            let sticky = state.gpu(spec.gpu).sticky().as_deref() == Some(id.as_str());
            json!({
                "id": id,
                "inflight": backend_state.map(|b| b.inflight_count()).unwrap_or(0),
                "last_used_secs_ago": if ever_used { Some(now.saturating_sub(last_used)) } else { None },
                "sticky": sticky,
            })
        })
        .collect();

    Json(json!({ "backends": backends }))
}

#[derive(Deserialize)]
pub struct DecisionsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/decisions?limit=N — recent admission decisions, newest first.
async fn decisions(
    State(state): State<Arc<RouterState>>,
    Query(q): Query<DecisionsQuery>,
) -> impl IntoResponse {
    let entries = state.decisions.recent(q.limit).await;
    Json(json!({ "decisions": entries }))
}
