//! Error types for the admission path and for general handler failures.
//!
//! [`AdmitError`] is the closed set of admission outcomes the router can
//! produce on its own — each one maps to a specific HTTP status and a stable
//! `type` string clients can match on. [`AppError`] wraps [`anyhow::Error`]
//! for anything else (config, I/O, bugs) and always surfaces as a 500 with no
//! further detail leaked to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The typed admission failures a request can hit on its way to a backend.
///
/// Each variant is one of the outcomes a deployer or client needs to be able
/// to distinguish by machine-readable `type`, not just by prose.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("model `{0}` is at its concurrency cap")]
    RateLimited(String),

    #[error("backend container `{0}` does not exist")]
    ContainerMissing(String),

    #[error("GPU {0} is busy with another chat backend")]
    GpuBusy(String),

    #[error("backend `{0}` did not become healthy in time")]
    Unhealthy(String),

    #[error("backend `{0}` failed to start: {1}")]
    StartFailed(String, String),

    #[error("upstream backend `{0}` returned a transport-level failure: {1}")]
    BadGateway(String, String),
}

impl AdmitError {
    fn status(&self) -> StatusCode {
        match self {
            AdmitError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdmitError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            AdmitError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AdmitError::ContainerMissing(_) => StatusCode::CONFLICT,
            AdmitError::GpuBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdmitError::Unhealthy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdmitError::StartFailed(_, _) => StatusCode::SERVICE_UNAVAILABLE,
            AdmitError::BadGateway(_, _) => StatusCode::BAD_GATEWAY,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AdmitError::Unauthorized => "unauthorized",
            AdmitError::UnknownModel(_) => "unknown_model",
            AdmitError::RateLimited(_) => "rate_limited",
            AdmitError::ContainerMissing(_) => "container_missing",
            AdmitError::GpuBusy(_) => "gpu_busy",
            AdmitError::Unhealthy(_) => "unhealthy",
            AdmitError::StartFailed(_, _) => "start_failed",
            AdmitError::BadGateway(_, _) => "bad_gateway",
        }
    }
}

impl IntoResponse for AdmitError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, kind = self.kind(), "admission failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "admission rejected");
        }
        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.kind(),
                }
            })),
        )
            .into_response()
    }
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` can be converted into an
/// [`AppError`] via the blanket [`From`] implementation.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "handler error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": "internal error", "type": "internal" } })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}
