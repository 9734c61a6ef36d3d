//! Transport-level pass-through to a backend's OpenAI-compatible surface.
//!
//! Headers are copied verbatim except `Host` and `Content-Length`, which the
//! HTTP client sets itself. The body is streamed through without
//! transformation; response status, headers, and body are preserved exactly.
//! This module owns the `inflight`/`last_used`/`sticky_backend` bookkeeping
//! that is tied to proxying rather than to admission.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt as _;

use crate::config::Kind;
use crate::error::AdmitError;
use crate::state::{InflightGuard, RouterState};

/// Forward a request body to `backend_id`'s upstream endpoint for `kind`,
/// returning the upstream response verbatim. Increments the backend's
/// inflight counter before the call and decrements it unconditionally after,
/// via an RAII guard that covers every exit path.
pub async fn forward(
    state: &RouterState,
    backend_id: &str,
    kind: Kind,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, AdmitError> {
    let spec = state
        .config
        .registry
        .get(backend_id)
        .ok_or_else(|| AdmitError::UnknownModel(backend_id.to_string()))?;

    let backend_state = state
        .backend(backend_id)
        .expect("every registry backend has state");
    let _guard = InflightGuard::enter(backend_state);

    let url = match kind {
        Kind::Chat => format!("{}/chat/completions", spec.base_url),
        Kind::Embeddings => format!("{}/embeddings", spec.base_url),
        Kind::Rerank => format!("{}/rerank", strip_v1(&spec.base_url)),
    };

    let mut upstream_headers = headers.clone();
    upstream_headers.remove(axum::http::header::HOST);
    upstream_headers.remove(axum::http::header::CONTENT_LENGTH);

    let result = state
        .http_client
        .post(&url)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            return Err(AdmitError::BadGateway(backend_id.to_string(), e.to_string()));
        }
    };

    let status = resp.status();
    let response_headers = resp.headers().clone();

    if !status.is_server_error() {
        backend_state.mark_used_now(state.monotonic_now_secs());
        if let Some(gpu_state) = spec_gpu_state(state, spec.gpu) {
            gpu_state.set_sticky(backend_id);
        }
    }

    let byte_stream = resp.bytes_stream().map(|r| r.map_err(std::io::Error::other));

    let mut builder = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(headers_mut) = builder.headers_mut() {
        for (name, value) in response_headers.iter() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers_mut.append(name, value);
            }
        }
    }

    Ok(builder
        .body(Body::from_stream(byte_stream))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

fn spec_gpu_state(state: &RouterState, gpu: crate::config::Gpu) -> Option<&crate::state::GpuState> {
    Some(state.gpu(gpu))
}

fn strip_v1(base_url: &str) -> String {
    base_url.strip_suffix("/v1").unwrap_or(base_url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Policy, Registry};
    use crate::engine::FakeContainerEngine;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_policy() -> Policy {
        Policy {
            require_api_key: false,
            interactive_token: None,
            automation_token: None,
            admin_token: None,
            interactive_warmup: std::time::Duration::from_secs(45),
            automation_warmup: std::time::Duration::from_secs(180),
            health_probe_timeout: std::time::Duration::from_secs(15),
            max_start_retries: 3,
            container_stop_timeout: std::time::Duration::from_secs(45),
            keep_last_per_gpu: true,
            one_heavy_per_gpu: true,
            stop_embed_before_gpu1_generator: true,
            webui_fail_fast: true,
            automation_allow_preempt_gpu1: true,
            adaptive_routing: true,
            adaptive_threshold_tokens: 4096,
            global_ttl: std::time::Duration::from_secs(1200),
            gpu1_chat_ttl: std::time::Duration::from_secs(900),
            grace_idle: std::time::Duration::from_secs(300),
            default_model_cap: 8,
            admin_decisions_capacity: 200,
            client_port: 8080,
            admin_port: 8081,
        }
    }

    async fn test_state(base_url: String) -> RouterState {
        let toml_src = format!(
            r#"
            [[backend]]
            model = "llama"
            kind = "chat"
            gpu = "1"
            strategy = "throughput"
            base_url = "{base_url}"
            container_name = "llama-1"
            "#
        );
        let config = Arc::new(Config {
            registry: Registry::from_file(toml::from_str(&toml_src).unwrap(), 8).unwrap(),
            policy: test_policy(),
        });
        RouterState::new(config, Arc::new(FakeContainerEngine::new()))
    }

    #[tokio::test]
    async fn successful_proxy_updates_last_used_and_sticky() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let state = test_state(server.uri()).await;
        let headers = HeaderMap::new();
        let resp = forward(&state, "llama@1", Kind::Chat, &headers, Bytes::from("{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let backend = state.backend("llama@1").unwrap();
        assert!(backend.was_ever_used());
        assert_eq!(state.gpu(crate::config::Gpu::Gpu1).sticky(), Some("llama@1".to_string()));
        assert_eq!(backend.inflight_count(), 0);
    }

    #[tokio::test]
    async fn server_error_does_not_update_last_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = test_state(server.uri()).await;
        let headers = HeaderMap::new();
        let resp = forward(&state, "llama@1", Kind::Chat, &headers, Bytes::from("{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let backend = state.backend("llama@1").unwrap();
        assert!(!backend.was_ever_used());
    }

    #[tokio::test]
    async fn inflight_decrements_even_on_transport_failure() {
        let state = test_state("http://127.0.0.1:1".to_string()).await;
        let headers = HeaderMap::new();
        let result = forward(&state, "llama@1", Kind::Chat, &headers, Bytes::from("{}")).await;
        assert!(result.is_err());
        assert_eq!(state.backend("llama@1").unwrap().inflight_count(), 0);
    }
}
