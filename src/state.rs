//! Shared mutable state: per-backend and per-GPU cells layered over the
//! immutable [`Registry`](crate::config::Registry).
//!
//! The registry itself never changes after boot, so it lives behind a plain
//! `Arc`, not a lock. What *does* change — inflight counts, last-used
//! timestamps, sticky assignments, the start/gpu mutexes — lives in small
//! per-entity cells built once alongside the registry and indexed by the
//! same backend id / GPU the registry uses.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use tokio::sync::Mutex as AsyncMutex;

use crate::config::{Config, Gpu};
use crate::engine::ContainerEngine;
use crate::prober::HealthProber;
use crate::traffic::DecisionLog;

/// Mutable state for a single backend, keyed by `BackendSpec::id()`.
pub struct BackendState {
    /// Number of requests currently in flight against this backend.
    /// Incremented before the proxy call, decremented unconditionally after,
    /// regardless of outcome.
    pub inflight: AtomicI64,
    /// Seconds elapsed since [`RouterState::started_at`] as of the last
    /// successful proxy response — a monotonic offset, not a wall-clock
    /// timestamp, so idle/TTL comparisons never see a backward jump from an
    /// NTP correction or manual clock change. Meaningless until
    /// [`Self::was_ever_used`] is true.
    pub last_used: AtomicU64,
    /// Whether this backend has ever completed a successful proxy call.
    /// Kept separate from `last_used` so "used at the very start of the
    /// process" (offset 0) is distinguishable from "never used".
    pub ever_used: AtomicBool,
    /// Held while starting this specific backend's container, so concurrent
    /// admissions for the same backend collapse into one start attempt.
    pub start_lock: AsyncMutex<()>,
}

impl BackendState {
    fn new() -> Self {
        Self {
            inflight: AtomicI64::new(0),
            last_used: AtomicU64::new(0),
            ever_used: AtomicBool::new(false),
            start_lock: AsyncMutex::new(()),
        }
    }

    pub fn inflight_count(&self) -> i64 {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Record a successful proxy completion at `now_secs` (seconds elapsed
    /// since the router started — see [`RouterState::monotonic_now_secs`]).
    pub fn mark_used_now(&self, now_secs: u64) {
        self.last_used.store(now_secs, Ordering::SeqCst);
        self.ever_used.store(true, Ordering::SeqCst);
    }

    pub fn was_ever_used(&self) -> bool {
        self.ever_used.load(Ordering::SeqCst)
    }

    pub fn last_used_secs(&self) -> u64 {
        self.last_used.load(Ordering::SeqCst)
    }
}

/// Mutable state for one of the two GPUs.
pub struct GpuState {
    /// Held while enforcing the one-heavy-chat-per-GPU policy: checking what
    /// is running, preempting it if needed, and starting the new one.
    pub gpu_lock: AsyncMutex<()>,
    /// The backend id currently "sticky" on this GPU — the last chat backend
    /// it served, kept alive across the reaper's keep-last-per-GPU exception.
    pub sticky_backend: RwLock<Option<String>>,
}

impl GpuState {
    fn new() -> Self {
        Self {
            gpu_lock: AsyncMutex::new(()),
            sticky_backend: RwLock::new(None),
        }
    }

    pub fn sticky(&self) -> Option<String> {
        self.sticky_backend.read().unwrap().clone()
    }

    pub fn set_sticky(&self, backend_id: &str) {
        *self.sticky_backend.write().unwrap() = Some(backend_id.to_string());
    }
}

/// Top-level shared application state, held behind an `Arc` by every
/// handler and background task.
pub struct RouterState {
    pub config: Arc<Config>,
    pub engine: Arc<dyn ContainerEngine>,
    pub backend_states: HashMap<String, BackendState>,
    pub gpu_states: HashMap<Gpu, GpuState>,
    pub decisions: Arc<DecisionLog>,
    /// Shared client used to proxy requests to backends — reqwest clients
    /// pool connections internally, so one instance per process is correct.
    pub http_client: reqwest::Client,
    pub prober: HealthProber,
    /// Cumulative count of backends stopped by the reaper, for `/metrics`.
    pub reaped_total: AtomicU64,
    /// Process start, as a `tokio` clock instant so tests can pause/advance
    /// it (`tokio::time::pause`/`advance`) instead of sleeping in real time.
    pub started_at: tokio::time::Instant,
}

impl RouterState {
    pub fn new(config: Arc<Config>, engine: Arc<dyn ContainerEngine>) -> Self {
        let backend_states = config
            .registry
            .backends
            .iter()
            .map(|b| (b.id(), BackendState::new()))
            .collect();
        let gpu_states = Gpu::ALL.into_iter().map(|g| (g, GpuState::new())).collect();
        let decisions = Arc::new(DecisionLog::new(config.policy.admin_decisions_capacity));

        Self {
            config,
            engine,
            backend_states,
            gpu_states,
            decisions,
            http_client: reqwest::Client::new(),
            prober: HealthProber::new(),
            reaped_total: AtomicU64::new(0),
            started_at: tokio::time::Instant::now(),
        }
    }

    pub fn backend(&self, id: &str) -> Option<&BackendState> {
        self.backend_states.get(id)
    }

    pub fn gpu(&self, gpu: Gpu) -> &GpuState {
        // Every Gpu variant is inserted in `new`, so this is infallible.
        self.gpu_states.get(&gpu).expect("all GPUs have state")
    }

    /// Seconds elapsed since the router started, per the monotonic clock.
    /// The shared "now" for all idle/TTL arithmetic — see `BackendState::last_used`.
    pub fn monotonic_now_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// RAII guard that decrements a backend's inflight counter on drop,
/// regardless of how the scope is exited — covers early returns, `?`, and
/// panics alike.
pub struct InflightGuard<'a> {
    state: &'a BackendState,
}

impl<'a> InflightGuard<'a> {
    pub fn enter(state: &'a BackendState) -> Self {
        state.inflight.fetch_add(1, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.state.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_guard_increments_and_decrements() {
        let b = BackendState::new();
        assert_eq!(b.inflight_count(), 0);
        {
            let _g = InflightGuard::enter(&b);
            assert_eq!(b.inflight_count(), 1);
        }
        assert_eq!(b.inflight_count(), 0);
    }

    #[test]
    fn inflight_never_goes_negative_across_nested_guards() {
        let b = BackendState::new();
        let g1 = InflightGuard::enter(&b);
        let g2 = InflightGuard::enter(&b);
        assert_eq!(b.inflight_count(), 2);
        drop(g1);
        assert_eq!(b.inflight_count(), 1);
        drop(g2);
        assert_eq!(b.inflight_count(), 0);
    }

    #[test]
    fn gpu_state_sticky_round_trips() {
        let g = GpuState::new();
        assert_eq!(g.sticky(), None);
        g.set_sticky("llama@0");
        assert_eq!(g.sticky(), Some("llama@0".to_string()));
    }

    #[test]
    fn mark_used_now_records_offset_and_flips_ever_used() {
        let b = BackendState::new();
        assert!(!b.was_ever_used());
        b.mark_used_now(42);
        assert!(b.was_ever_used());
        assert_eq!(b.last_used_secs(), 42);
    }

    #[test]
    fn marking_used_at_offset_zero_is_still_distinguishable_from_never_used() {
        let b = BackendState::new();
        b.mark_used_now(0);
        assert!(b.was_ever_used());
        assert_eq!(b.last_used_secs(), 0);
    }

    #[tokio::test]
    async fn monotonic_now_secs_starts_near_zero() {
        let config = test_config();
        let state = RouterState::new(config, Arc::new(crate::engine::FakeContainerEngine::new()));
        assert_eq!(state.monotonic_now_secs(), 0);
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            registry: crate::config::Registry::from_file(toml::from_str("").unwrap(), 8).unwrap(),
            policy: test_policy(),
        })
    }

    fn test_policy() -> crate::config::Policy {
        crate::config::Policy {
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
}
