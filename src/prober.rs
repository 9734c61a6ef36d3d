//! Health probing: decides whether a backend is actually ready to serve,
//! beyond the container engine's notion of "running".

use std::time::Duration;

use serde_json::json;

use crate::config::{BackendSpec, Kind};

/// Issues HTTP probes against a backend's OpenAI-compatible surface.
pub struct HealthProber {
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// One probe attempt: model listing plus a kind-specific minimal request.
    /// Any network error, non-200, or unparseable/unmatched payload counts as
    /// unhealthy — this never returns `Err`, only `Ok(bool)`.
    pub async fn probe(&self, spec: &BackendSpec, timeout: Duration) -> bool {
        match self.probe_inner(spec, timeout).await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::debug!(backend = %spec.id(), error = %e, "probe failed");
                false
            }
        }
    }

    async fn probe_inner(&self, spec: &BackendSpec, timeout: Duration) -> anyhow::Result<bool> {
        if !self.models_registered(spec, timeout).await? {
            return Ok(false);
        }
        self.kind_probe(spec, timeout).await
    }

    async fn models_registered(&self, spec: &BackendSpec, timeout: Duration) -> anyhow::Result<bool> {
        let url = format!("{}/models", spec.base_url);
        let resp = self.client.get(&url).timeout(timeout).send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await?;
        let registered = body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| e.get("id").and_then(|id| id.as_str()) == Some(spec.model.as_str()))
            })
            .unwrap_or(false);
        Ok(registered)
    }

    async fn kind_probe(&self, spec: &BackendSpec, timeout: Duration) -> anyhow::Result<bool> {
        let (url, body) = match spec.kind {
            Kind::Chat => (
                format!("{}/chat/completions", spec.base_url),
                json!({
                    "model": spec.model,
                    "messages": [{ "role": "user", "content": "ping" }],
                    "max_tokens": 5,
                    "temperature": 0,
                }),
            ),
            Kind::Embeddings => (
                format!("{}/embeddings", spec.base_url),
                json!({ "model": spec.model, "input": "ping" }),
            ),
            Kind::Rerank => (
                // Reranker's probe endpoint is at the base root, not under /v1.
                format!("{}/rerank", strip_v1(&spec.base_url)),
                json!({ "query": "ping", "documents": ["pong"], "top_n": 1 }),
            ),
        };

        let resp = self.client.post(&url).timeout(timeout).json(&body).send().await?;
        Ok(resp.status().is_success())
    }

    /// Poll [`probe`](Self::probe) every 2s until it succeeds or `deadline` elapses.
    pub async fn wait_until_healthy(&self, spec: &BackendSpec, probe_timeout: Duration, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if self.probe(spec, probe_timeout).await {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_v1(base_url: &str) -> String {
    base_url.strip_suffix("/v1").unwrap_or(base_url).to_string()
}
