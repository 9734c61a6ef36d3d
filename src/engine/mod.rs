//! Container Engine abstraction: the router's only way to start, stop, or
//! inspect the processes it fronts. Kept as a trait so the lifecycle
//! controller and reaper can be exercised in tests without a real Docker
//! daemon.

mod docker;
#[cfg(test)]
mod fake;

pub use docker::DockerEngine;
#[cfg(test)]
pub use fake::FakeContainerEngine;

use async_trait::async_trait;

/// Observed state of a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No container with this name is known to the engine.
    Missing,
    /// Container exists but is not running.
    Stopped,
    /// Container exists and is running.
    Running,
}

/// Abstraction over the Docker Engine API (or any equivalent), scoped to
/// exactly the operations the lifecycle controller and reaper need. The
/// router never creates or removes containers — only starts and stops ones
/// that already exist.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn state(&self, container_name: &str) -> anyhow::Result<ContainerState>;

    async fn start(&self, container_name: &str) -> anyhow::Result<()>;

    /// Graceful stop with `timeout`; engines that cannot honor a timeout
    /// directly should force-kill once it elapses.
    async fn stop(&self, container_name: &str, timeout: std::time::Duration) -> anyhow::Result<()>;
}
