//! Bearer-token authentication middleware for the client API.
//!
//! Classifies every request into a [`Role`] via [`crate::auth::authenticate`]
//! and injects it as a request extension so handlers can read it without
//! re-inspecting the `Authorization` header.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{self, Role};
use crate::state::RouterState;

/// Axum middleware: classifies the caller's role and injects it as an
/// extension, or rejects the request with the typed `unauthorized` error.
pub async fn client_auth_middleware(
    State(state): State<Arc<RouterState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth::authenticate(&state.config.policy, header_value) {
        Ok(role) => {
            req.extensions_mut().insert(role);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Extract the [`Role`] a prior middleware stage injected, defaulting to
/// `Interactive` if the middleware was skipped (e.g. in unit tests that call
/// a handler directly).
pub fn role_of(req: &Request) -> Role {
    req.extensions()
        .get::<Role>()
        .copied()
        .unwrap_or(Role::Interactive)
}
