//! Static registry and policy configuration for gpu-fleet-router.
//!
//! The registry (which backends exist, what they serve, where they live) is
//! loaded once from a TOML file and validated before any port opens — it is
//! immutable for the lifetime of the process (see `state.rs`). Policy
//! constants (timeouts, caps, feature flags) are read once from environment
//! variables at startup: deployers edit the registry file to add backends,
//! and tune policy via env vars without touching it.
//!
//! # Example registry
//! ```toml
//! [[backend]]
//! model          = "llama31-8b-instruct"
//! kind           = "chat"
//! gpu            = "0"
//! strategy       = "long"
//! base_url       = "http://127.0.0.1:9001"
//! container_name = "llama31-8b-instruct-gpu0"
//!
//! [[backend]]
//! model          = "llama31-8b-instruct"
//! kind           = "chat"
//! gpu            = "1"
//! strategy       = "throughput"
//! base_url       = "http://127.0.0.1:9002"
//! container_name = "llama31-8b-instruct-gpu1"
//!
//! [models.llama31-8b-instruct]
//! cap = 8
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which of the two accelerator devices a backend runs on.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gpu {
    #[serde(rename = "0")]
    Gpu0,
    #[serde(rename = "1")]
    Gpu1,
}

impl Gpu {
    pub fn as_str(self) -> &'static str {
        match self {
            Gpu::Gpu0 => "0",
            Gpu::Gpu1 => "1",
        }
    }

    pub const ALL: [Gpu; 2] = [Gpu::Gpu0, Gpu::Gpu1];
}

impl std::fmt::Display for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a backend serves.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Chat,
    Embeddings,
    Rerank,
}

impl Kind {
    /// Chat backends are "heavy" — subject to the one-per-GPU rule.
    pub fn is_heavy(self) -> bool {
        matches!(self, Kind::Chat)
    }
}

/// A chat backend's role within a model's GPU0/GPU1 pair.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Large context, deployed on GPU0.
    Long,
    /// Smaller context, higher concurrency, deployed on GPU1.
    #[default]
    Throughput,
}

/// A single static registry entry.
///
/// Composite id is `<model>@<gpu>`, computed by [`BackendSpec::id`] — never
/// stored redundantly in the TOML so there is exactly one place a deployer
/// can get it wrong (the `model`/`gpu` fields themselves).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendSpec {
    pub model: String,
    pub kind: Kind,
    pub gpu: Gpu,
    #[serde(default)]
    pub strategy: Strategy,
    pub base_url: String,
    pub container_name: String,
}

impl BackendSpec {
    pub fn id(&self) -> String {
        format!("{}@{}", self.model, self.gpu)
    }
}

/// Per-model overrides — currently just the inflight cap.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ModelOverride {
    pub cap: Option<u32>,
}

/// The raw TOML shape.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct RegistryFile {
    #[serde(default, rename = "backend")]
    backends: Vec<BackendSpec>,
    #[serde(default)]
    models: HashMap<String, ModelOverride>,
}

/// Immutable static registry: backends plus the derived model → backend-ids
/// index, built once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    /// Ordered as declared in the TOML — selection ties break on this order.
    pub backends: Vec<BackendSpec>,
    /// backend id -> index into `backends`.
    by_id: HashMap<String, usize>,
    /// model name -> ordered backend ids serving it.
    pub model_index: HashMap<String, Vec<String>>,
    /// model name -> per-model inflight cap.
    pub caps: HashMap<String, u32>,
}

impl Registry {
    pub(crate) fn from_file(file: RegistryFile, default_cap: u32) -> anyhow::Result<Self> {
        let mut by_id = HashMap::with_capacity(file.backends.len());
        let mut model_index: HashMap<String, Vec<String>> = HashMap::new();

        for (idx, spec) in file.backends.iter().enumerate() {
            let id = spec.id();
            anyhow::ensure!(
                by_id.insert(id.clone(), idx).is_none(),
                "duplicate backend id `{id}` in registry"
            );
            model_index.entry(spec.model.clone()).or_default().push(id);
        }

        let mut caps = HashMap::with_capacity(model_index.len());
        for model in model_index.keys() {
            let cap = file
                .models
                .get(model)
                .and_then(|m| m.cap)
                .unwrap_or(default_cap);
            caps.insert(model.clone(), cap);
        }

        let registry = Self {
            backends: file.backends,
            by_id,
            model_index,
            caps,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen_containers = std::collections::HashSet::new();
        for spec in &self.backends {
            anyhow::ensure!(
                seen_containers.insert(spec.container_name.as_str()),
                "container name `{}` is used by more than one backend",
                spec.container_name
            );
        }

        for (model, ids) in &self.model_index {
            let kinds: Vec<Kind> = ids.iter().map(|id| self.get(id).unwrap().kind).collect();
            anyhow::ensure!(
                kinds.iter().all(|k| *k == kinds[0]),
                "model `{model}` has backends of mixed kinds"
            );

            match kinds[0] {
                Kind::Chat => {
                    let gpus: std::collections::HashSet<Gpu> =
                        ids.iter().map(|id| self.get(id).unwrap().gpu).collect();
                    anyhow::ensure!(
                        gpus.contains(&Gpu::Gpu0) && gpus.contains(&Gpu::Gpu1),
                        "chat model `{model}` must have one backend on each GPU"
                    );
                    anyhow::ensure!(
                        ids.len() == 2,
                        "chat model `{model}` must have exactly two backends, found {}",
                        ids.len()
                    );
                }
                Kind::Embeddings | Kind::Rerank => {
                    anyhow::ensure!(
                        ids.iter().all(|id| self.get(id).unwrap().gpu == Gpu::Gpu1),
                        "{:?} model `{model}` must live on GPU1 only",
                        kinds[0]
                    );
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&BackendSpec> {
        self.by_id.get(id).map(|&idx| &self.backends[idx])
    }

    pub fn cap_for(&self, model: &str) -> Option<u32> {
        self.caps.get(model).copied()
    }

    pub fn backends_for_model(&self, model: &str) -> &[String] {
        self.model_index
            .get(model)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All chat backends on `gpu`, in registry order.
    pub fn chat_backends_on(&self, gpu: Gpu) -> impl Iterator<Item = &BackendSpec> {
        self.backends
            .iter()
            .filter(move |b| b.gpu == gpu && b.kind == Kind::Chat)
    }

    /// The embeddings/reranker backend on GPU1, if configured, for displacement.
    pub fn gpu1_backend_of_kind(&self, kind: Kind) -> Option<&BackendSpec> {
        self.backends
            .iter()
            .find(|b| b.gpu == Gpu::Gpu1 && b.kind == kind)
    }
}

fn load_registry_file(path: &Path) -> anyhow::Result<RegistryFile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing registry TOML at {}", path.display()))
}

/// Feature flags and timing/cap constants — all read once from the
/// environment at startup.
#[derive(Debug, Clone)]
pub struct Policy {
    pub require_api_key: bool,
    pub interactive_token: Option<String>,
    pub automation_token: Option<String>,
    pub admin_token: Option<String>,

    pub interactive_warmup: std::time::Duration,
    pub automation_warmup: std::time::Duration,
    pub health_probe_timeout: std::time::Duration,
    pub max_start_retries: u32,
    pub container_stop_timeout: std::time::Duration,

    pub keep_last_per_gpu: bool,
    pub one_heavy_per_gpu: bool,
    pub stop_embed_before_gpu1_generator: bool,
    pub webui_fail_fast: bool,
    pub automation_allow_preempt_gpu1: bool,

    pub adaptive_routing: bool,
    pub adaptive_threshold_tokens: u64,

    pub global_ttl: std::time::Duration,
    pub gpu1_chat_ttl: std::time::Duration,
    pub grace_idle: std::time::Duration,

    pub default_model_cap: u32,
    pub admin_decisions_capacity: usize,

    pub client_port: u16,
    pub admin_port: u16,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default_secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(env_or(name, default_secs))
}

fn env_mins(name: &str, default_mins: u64) -> std::time::Duration {
    std::time::Duration::from_secs(env_or::<u64>(name, default_mins) * 60)
}

impl Policy {
    pub fn from_env() -> Self {
        Self {
            require_api_key: env_or("GFR_REQUIRE_API_KEY", true),
            interactive_token: std::env::var("GFR_INTERACTIVE_TOKEN").ok(),
            automation_token: std::env::var("GFR_AUTOMATION_TOKEN").ok(),
            admin_token: std::env::var("GFR_ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),

            interactive_warmup: env_secs("GFR_INTERACTIVE_WARMUP_SECS", 45),
            automation_warmup: env_secs("GFR_AUTOMATION_WARMUP_SECS", 180),
            health_probe_timeout: env_secs("GFR_HEALTH_PROBE_TIMEOUT_SECS", 15),
            max_start_retries: env_or("GFR_MAX_START_RETRIES", 3),
            container_stop_timeout: env_secs("GFR_CONTAINER_STOP_TIMEOUT_SECS", 45),

            keep_last_per_gpu: env_or("GFR_KEEP_LAST_PER_GPU", true),
            one_heavy_per_gpu: env_or("GFR_ONE_HEAVY_PER_GPU", true),
            stop_embed_before_gpu1_generator: env_or("GFR_STOP_EMBED_BEFORE_GPU1_GENERATOR", true),
            webui_fail_fast: env_or("GFR_WEBUI_FAIL_FAST", true),
            automation_allow_preempt_gpu1: env_or("GFR_AUTOMATION_ALLOW_PREEMPT_GPU1", true),

            adaptive_routing: env_or("GFR_ADAPTIVE_ROUTING", true),
            adaptive_threshold_tokens: env_or("GFR_ADAPTIVE_THRESHOLD_TOKENS", 4096),

            global_ttl: env_mins("GFR_GLOBAL_TTL_MINS", 20),
            gpu1_chat_ttl: env_mins("GFR_GPU1_CHAT_TTL_MINS", 15),
            grace_idle: env_mins("GFR_GRACE_IDLE_MINS", 5),

            default_model_cap: env_or("GFR_DEFAULT_MODEL_CAP", 8),
            admin_decisions_capacity: env_or("GFR_ADMIN_DECISIONS_CAPACITY", 200),

            client_port: env_or("GFR_CLIENT_PORT", 8080),
            admin_port: env_or("GFR_ADMIN_PORT", 8081),
        }
    }
}

/// Top-level config: static registry + policy. Both are loaded once at
/// startup and never change for the life of the process.
pub struct Config {
    pub registry: Registry,
    pub policy: Policy,
}

impl Config {
    pub fn load(registry_path: &Path) -> anyhow::Result<Self> {
        let policy = Policy::from_env();
        let file = load_registry_file(registry_path)?;
        let registry = Registry::from_file(file, policy.default_model_cap)?;
        Ok(Self { registry, policy })
    }
}
