//! Backend selection: stickiness → adaptive routing → role affinity →
//! fallback, in that priority order. Pure function of the registry and the
//! current sticky-backend state; never mutates anything.

use crate::auth::Role;
use crate::config::{Gpu, Strategy};
use crate::error::AdmitError;
use crate::state::RouterState;

fn inferred_strategy(estimated_tokens: Option<u64>, threshold: u64) -> Strategy {
    match estimated_tokens {
        Some(tokens) if tokens > threshold => Strategy::Long,
        _ => Strategy::Throughput,
    }
}

/// Select a preferred backend id for `model`, given an optional token
/// estimate and caller role. Returns [`AdmitError::UnknownModel`] if the
/// model has no registered backends.
pub fn select(
    state: &RouterState,
    model: &str,
    estimated_tokens: Option<u64>,
    role: Option<Role>,
) -> Result<String, AdmitError> {
    let registry = &state.config.registry;
    let candidates = registry.backends_for_model(model);
    if candidates.is_empty() {
        return Err(AdmitError::UnknownModel(model.to_string()));
    }

    let policy = &state.config.policy;
    let need = inferred_strategy(estimated_tokens, policy.adaptive_threshold_tokens);

    // 1. Stickiness, GPU0 then GPU1.
    for gpu in Gpu::ALL {
        let Some(sticky_id) = state.gpu(gpu).sticky() else {
            continue;
        };
        if !candidates.iter().any(|id| id == &sticky_id) {
            continue;
        }
        let Some(spec) = registry.get(&sticky_id) else {
            continue;
        };
        if !policy.adaptive_routing || spec.strategy == need {
            return Ok(sticky_id);
        }
    }

    // 2. Adaptive routing by inferred strategy.
    if policy.adaptive_routing && estimated_tokens.is_some() {
        if let Some(id) = candidates
            .iter()
            .find(|id| registry.get(id).map(|s| s.strategy) == Some(need))
        {
            return Ok(id.clone());
        }
    }

    // 3. Role affinity: interactive -> GPU0, automation -> GPU1.
    if let Some(role) = role {
        let preferred_gpu = match role {
            Role::Interactive => Gpu::Gpu0,
            Role::Automation => Gpu::Gpu1,
        };
        if let Some(id) = candidates
            .iter()
            .find(|id| registry.get(id).map(|s| s.gpu) == Some(preferred_gpu))
        {
            return Ok(id.clone());
        }
    }

    // 4. Fallback: first in registry order.
    Ok(candidates[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Policy, Registry};
    use crate::engine::FakeContainerEngine;
    use std::sync::Arc;

    fn test_policy() -> Policy {
        Policy {
            require_api_key: true,
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

    fn test_state() -> RouterState {
        // Registry has no public constructor outside the module by design;
        // tests build one through the TOML loader instead.
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
            registry: Registry::from_file(
                toml::from_str(toml_src).unwrap(),
                test_policy().default_model_cap,
            )
            .unwrap(),
            policy: test_policy(),
        });
        RouterState::new(config, Arc::new(FakeContainerEngine::new()))
    }

    #[test]
    fn unknown_model_errors() {
        let state = test_state();
        assert!(select(&state, "nonexistent", None, None).is_err());
    }

    #[test]
    fn boundary_threshold_equal_selects_throughput() {
        let state = test_state();
        let id = select(&state, "llama", Some(4096), Some(Role::Interactive)).unwrap();
        assert_eq!(id, "llama@1");
    }

    #[test]
    fn above_threshold_selects_long() {
        let state = test_state();
        let id = select(&state, "llama", Some(4097), Some(Role::Interactive)).unwrap();
        assert_eq!(id, "llama@0");
    }

    #[test]
    fn sticky_backend_wins_when_strategy_matches_need() {
        let state = test_state();
        state.gpu(Gpu::Gpu1).set_sticky("llama@1");
        let id = select(&state, "llama", Some(100), Some(Role::Interactive)).unwrap();
        assert_eq!(id, "llama@1");
    }

    #[test]
    fn sticky_backend_skipped_when_strategy_mismatches_need() {
        let state = test_state();
        state.gpu(Gpu::Gpu1).set_sticky("llama@1");
        // High token estimate implies "long" need, but @1 is sticky+throughput.
        let id = select(&state, "llama", Some(9000), Some(Role::Interactive)).unwrap();
        assert_eq!(id, "llama@0");
    }

    #[test]
    fn role_affinity_without_estimate_prefers_gpu_by_role() {
        let state = test_state();
        let interactive = select(&state, "llama", None, Some(Role::Interactive)).unwrap();
        assert_eq!(interactive, "llama@0");
        let automation = select(&state, "llama", None, Some(Role::Automation)).unwrap();
        assert_eq!(automation, "llama@1");
    }

    #[test]
    fn fallback_with_no_role_and_no_estimate_returns_first_in_registry_order() {
        let state = test_state();
        let id = select(&state, "llama", None, None).unwrap();
        assert_eq!(id, "llama@0");
    }

    #[test]
    fn selector_is_deterministic() {
        let state = test_state();
        let a = select(&state, "llama", Some(5000), Some(Role::Automation)).unwrap();
        let b = select(&state, "llama", Some(5000), Some(Role::Automation)).unwrap();
        assert_eq!(a, b);
    }
}
