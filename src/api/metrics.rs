//! Prometheus-compatible `/metrics` endpoint.
//!
//! Inflight gauges read the live atomics directly — they are exact, not a
//! window sample. Admission outcome counts and latency sums are derived from
//! the decision log's ring-buffer window, same sliding-window caveat as the
//! teacher's `/metrics`: they reflect recent history, not lifetime totals,
//! because the underlying buffer has a fixed capacity.
//!
//! Metric families:
//! - `gfr_inflight`           — current inflight count, per backend (gauge)
//! - `gfr_requests`           — admission decisions in the window, by model/role/outcome
//! - `gfr_latency_ms_sum`     — sum of latencies per model (for avg)
//! - `gfr_latency_ms_count`   — denominator matching the sum above
//! - `gfr_reaped_total`       — cumulative backends stopped by the sweeper

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::state::RouterState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let entries = state.decisions.recent(usize::MAX).await;

    let mut request_counts: HashMap<(String, String, String), u64> = HashMap::new();
    let mut latency: HashMap<String, (u64, u64)> = HashMap::new();

    for e in &entries {
        *request_counts
            .entry((e.model.clone(), e.role.clone(), e.outcome.clone()))
            .or_default() += 1;

        let lat = latency.entry(e.model.clone()).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP gfr_inflight Requests currently in flight per backend.\n");
    out.push_str("# TYPE gfr_inflight gauge\n");
    for spec in &state.config.registry.backends {
        let id = spec.id();
        if let Some(b) = state.backend(&id) {
            out.push_str(&format!("gfr_inflight{{backend=\"{id}\"}} {}\n", b.inflight_count()));
        }
    }
    out.push('\n');

    out.push_str("# HELP gfr_requests Admission decisions in the current window, labelled by model, role, and outcome.\n");
    out.push_str("# TYPE gfr_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((model, role, outcome), count) in req_rows {
        out.push_str(&format!(
            "gfr_requests{{model=\"{model}\",role=\"{role}\",outcome=\"{outcome}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP gfr_latency_ms_sum Sum of admission+proxy latency (ms) in the current window, per model.\n");
    out.push_str("# TYPE gfr_latency_ms_sum gauge\n");
    out.push_str("# HELP gfr_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE gfr_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (model, (sum, count)) in lat_rows {
        out.push_str(&format!("gfr_latency_ms_sum{{model=\"{model}\"}} {sum}\n"));
        out.push_str(&format!("gfr_latency_ms_count{{model=\"{model}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP gfr_reaped_total Cumulative backends stopped by the TTL sweeper.\n");
    out.push_str("# TYPE gfr_reaped_total counter\n");
    out.push_str(&format!(
        "gfr_reaped_total {}\n",
        state.reaped_total.load(std::sync::atomic::Ordering::SeqCst)
    ));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Policy, Registry};
    use crate::engine::FakeContainerEngine;
    use crate::traffic::DecisionEntry;

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

    fn test_state() -> Arc<RouterState> {
        let toml_src = r#"
            [[backend]]
            model = "llama"
            kind = "chat"
            gpu = "0"
            strategy = "long"
            base_url = "http://127.0.0.1:9000"
            container_name = "llama-0"

            [[backend]]
            model = "llama"
            kind = "chat"
            gpu = "1"
            strategy = "throughput"
            base_url = "http://127.0.0.1:9001"
            container_name = "llama-1"
        "#;
        let config = Arc::new(Config {
            registry: Registry::from_file(toml::from_str(toml_src).unwrap(), 8).unwrap(),
            policy: test_policy(),
        });
        Arc::new(RouterState::new(config, Arc::new(FakeContainerEngine::new())))
    }

    #[tokio::test]
    async fn renders_inflight_gauge_per_backend() {
        let state = test_state();
        state.backend("llama@0").unwrap().inflight.fetch_add(3, std::sync::atomic::Ordering::SeqCst);
        let resp = metrics(State(state)).await.into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gfr_inflight{backend=\"llama@0\"} 3"));
    }

    #[tokio::test]
    async fn renders_request_counts_from_decision_log() {
        let state = test_state();
        state.decisions.push(
            DecisionEntry::new("llama", "interactive", "admitted", 50).with_backend("llama@1"),
        );
        let resp = metrics(State(state)).await.into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gfr_requests{model=\"llama\",role=\"interactive\",outcome=\"admitted\"} 1"));
        assert!(text.contains("gfr_latency_ms_sum{model=\"llama\"} 50"));
    }

    #[tokio::test]
    async fn renders_reaped_total() {
        let state = test_state();
        state.reaped_total.fetch_add(2, std::sync::atomic::Ordering::SeqCst);
        let resp = metrics(State(state)).await.into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gfr_reaped_total 2"));
    }
}
