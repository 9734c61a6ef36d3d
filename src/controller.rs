//! Lifecycle controller: the admission and startup protocol. The only
//! component that issues container start/stop calls.

use std::time::Duration;

use crate::auth::Role;
use crate::config::{Gpu, Kind};
use crate::engine::ContainerState;
use crate::error::AdmitError;
use crate::prober::HealthProber;
use crate::state::RouterState;

const PREEMPTION_SETTLE: Duration = Duration::from_secs(3);
const DISPLACEMENT_SETTLE: Duration = Duration::from_secs(3);
const ENGINE_RETRY_DELAY: Duration = Duration::from_secs(2);
const UNHEALTHY_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Best-effort stop shared by the controller (preemption, displacement) and
/// the reaper. Failures are logged and swallowed — they never surface to a
/// caller, per the propagation policy for auxiliary container-engine calls.
pub async fn best_effort_stop(state: &RouterState, container_name: &str) {
    if let Err(e) = state
        .engine
        .stop(container_name, state.config.policy.container_stop_timeout)
        .await
    {
        tracing::warn!(container = container_name, error = %e, "best-effort stop failed");
    }
}

/// Try `backend_id` first; on `gpu_busy` retry the remaining backends for
/// the same model in registry order. Any other typed failure surfaces
/// immediately. If every candidate reports `gpu_busy`, that is the final
/// error.
pub async fn admit_with_fallback(
    state: &RouterState,
    model: &str,
    preferred_backend_id: &str,
    role: Role,
    prober: &HealthProber,
) -> Result<String, AdmitError> {
    let candidates = state.config.registry.backends_for_model(model).to_vec();
    let mut ordered = vec![preferred_backend_id.to_string()];
    ordered.extend(candidates.into_iter().filter(|id| id != preferred_backend_id));

    let mut last_gpu_busy: Option<AdmitError> = None;
    for backend_id in ordered {
        match admit(state, &backend_id, role, prober).await {
            Ok(()) => return Ok(backend_id),
            Err(AdmitError::GpuBusy(gpu)) => {
                last_gpu_busy = Some(AdmitError::GpuBusy(gpu));
                continue;
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_gpu_busy.unwrap_or_else(|| AdmitError::UnknownModel(model.to_string())))
}

/// The admission and startup protocol for a single backend (spec §4.4).
pub async fn admit(
    state: &RouterState,
    backend_id: &str,
    role: Role,
    prober: &HealthProber,
) -> Result<(), AdmitError> {
    let spec = state
        .config
        .registry
        .get(backend_id)
        .ok_or_else(|| AdmitError::UnknownModel(backend_id.to_string()))?
        .clone();
    let policy = state.config.policy.clone();

    // 1. Cap check — sum of inflight across all backends for this model.
    let total_inflight: i64 = state
        .config
        .registry
        .backends_for_model(&spec.model)
        .iter()
        .filter_map(|id| state.backend(id))
        .map(|b| b.inflight_count())
        .sum();
    let cap = state.config.registry.cap_for(&spec.model).unwrap_or(policy.default_model_cap);
    if total_inflight >= cap as i64 {
        return Err(AdmitError::RateLimited(spec.model.clone()));
    }

    // 2. Existence check.
    let engine_state = state
        .engine
        .state(&spec.container_name)
        .await
        .map_err(|e| AdmitError::StartFailed(backend_id.to_string(), e.to_string()))?;
    if engine_state == ContainerState::Missing {
        return Err(AdmitError::ContainerMissing(spec.container_name.clone()));
    }

    // 3. Fast path.
    if engine_state == ContainerState::Running {
        return probe_or_unhealthy(prober, &spec, policy.health_probe_timeout, backend_id).await;
    }

    // 4. Start path — serialize per backend.
    let backend_state = state
        .backend(backend_id)
        .expect("every registry backend has state");
    let _start_guard = backend_state.start_lock.lock().await;

    // Double-checked: another caller may have started it while we waited.
    let rechecked = state
        .engine
        .state(&spec.container_name)
        .await
        .map_err(|e| AdmitError::StartFailed(backend_id.to_string(), e.to_string()))?;
    if rechecked == ContainerState::Running {
        return probe_or_unhealthy(prober, &spec, policy.health_probe_timeout, backend_id).await;
    }

    // 5. GPU policy phase.
    {
        let gpu_state = state.gpu(spec.gpu);
        let _gpu_guard = gpu_state.gpu_lock.lock().await;

        if spec.kind.is_heavy() && policy.one_heavy_per_gpu {
            if let Some(incumbent) = running_sibling_chat(state, spec.gpu, backend_id).await {
                let can_preempt = role == Role::Automation
                    && spec.gpu == Gpu::Gpu1
                    && policy.automation_allow_preempt_gpu1;
                if role == Role::Interactive && policy.webui_fail_fast {
                    return Err(AdmitError::GpuBusy(spec.gpu.to_string()));
                } else if can_preempt {
                    best_effort_stop(state, &incumbent.container_name).await;
                    tokio::time::sleep(PREEMPTION_SETTLE).await;
                } else {
                    return Err(AdmitError::GpuBusy(spec.gpu.to_string()));
                }
            }
        }

        if spec.gpu == Gpu::Gpu1 && spec.kind == Kind::Chat && policy.stop_embed_before_gpu1_generator {
            displace_gpu1_auxiliary(state).await;
            tokio::time::sleep(DISPLACEMENT_SETTLE).await;
        }
        // gpu_guard drops here — released before start_guard, per lock order.
    }

    // 6. Start with retries.
    let warmup = match role {
        Role::Interactive => policy.interactive_warmup,
        Role::Automation => policy.automation_warmup,
    };

    let mut last_error = String::new();
    for _attempt in 0..policy.max_start_retries {
        if let Err(e) = state.engine.start(&spec.container_name).await {
            last_error = e.to_string();
            tokio::time::sleep(ENGINE_RETRY_DELAY).await;
            continue;
        }

        if prober
            .wait_until_healthy(&spec, policy.health_probe_timeout, warmup)
            .await
        {
            return Ok(());
        }

        last_error = "did not become healthy within warmup timeout".to_string();
        best_effort_stop(state, &spec.container_name).await;
        tokio::time::sleep(UNHEALTHY_RETRY_DELAY).await;
    }

    Err(AdmitError::StartFailed(backend_id.to_string(), last_error))
}

async fn probe_or_unhealthy(
    prober: &HealthProber,
    spec: &crate::config::BackendSpec,
    timeout: Duration,
    backend_id: &str,
) -> Result<(), AdmitError> {
    if prober.probe(spec, timeout).await {
        Ok(())
    } else {
        Err(AdmitError::Unhealthy(backend_id.to_string()))
    }
}

/// Find a running chat backend on `gpu` other than `exclude_id`.
async fn running_sibling_chat(
    state: &RouterState,
    gpu: Gpu,
    exclude_id: &str,
) -> Option<crate::config::BackendSpec> {
    for sibling in state.config.registry.chat_backends_on(gpu) {
        if sibling.id() == exclude_id {
            continue;
        }
        if let Ok(ContainerState::Running) = state.engine.state(&sibling.container_name).await {
            return Some(sibling.clone());
        }
    }
    None
}

/// Best-effort stop of GPU1's embeddings and reranker backends, if running.
async fn displace_gpu1_auxiliary(state: &RouterState) {
    for kind in [Kind::Embeddings, Kind::Rerank] {
        if let Some(spec) = state.config.registry.gpu1_backend_of_kind(kind) {
            if let Ok(ContainerState::Running) = state.engine.state(&spec.container_name).await {
                best_effort_stop(state, &spec.container_name).await;
            }
        }
    }
}
