//! TTL sweeper: a background task that periodically stops idle backends.
//!
//! Runs on a 60s tick for the life of the process. Each tick walks every
//! registry entry and applies the skip rules in order — not running,
//! sticky-and-keep-warm, inflight, grace period — before comparing idle time
//! against the backend's TTL. Stops are best-effort, same as the controller's
//! preemption/displacement stops.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Gpu, Kind};
use crate::controller::best_effort_stop;
use crate::engine::ContainerState;
use crate::state::RouterState;

const TICK: Duration = Duration::from_secs(60);

/// Run the sweeper loop forever. Intended to be spawned once at startup via
/// `tokio::spawn`.
pub async fn run(state: std::sync::Arc<RouterState>) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;
        sweep(&state).await;
    }
}

/// One sweep of every registry backend. Split out from `run` so tests can
/// drive a single pass without waiting on the tick.
pub async fn sweep(state: &RouterState) {
    let now = state.monotonic_now_secs();
    for spec in &state.config.registry.backends {
        let id = spec.id();
        let backend_state = match state.backend(&id) {
            Some(b) => b,
            None => continue,
        };

        match state.engine.state(&spec.container_name).await {
            Ok(ContainerState::Running) => {}
            _ => continue,
        }

        if state.config.policy.keep_last_per_gpu {
            let sticky = state.gpu(spec.gpu).sticky();
            if sticky.as_deref() == Some(id.as_str()) && backend_state.was_ever_used() {
                continue;
            }
        }

        if backend_state.inflight_count() > 0 {
            continue;
        }

        let idle_secs = if backend_state.was_ever_used() {
            now.saturating_sub(backend_state.last_used_secs())
        } else {
            now
        };

        let grace = state.config.policy.grace_idle.as_secs();
        if idle_secs < grace {
            continue;
        }

        let ttl = backend_ttl(state, spec.gpu, spec.kind).as_secs();
        if idle_secs >= ttl {
            info!(backend = %id, idle_secs, ttl, "reaping idle backend");
            best_effort_stop(state, &spec.container_name).await;
            state.reaped_total.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        } else {
            debug!(backend = %id, idle_secs, ttl, "idle but under TTL");
        }
    }
}

fn backend_ttl(state: &RouterState, gpu: Gpu, kind: Kind) -> Duration {
    if gpu == Gpu::Gpu1 && kind == Kind::Chat {
        state.config.policy.gpu1_chat_ttl
    } else {
        state.config.policy.global_ttl
    }
}
