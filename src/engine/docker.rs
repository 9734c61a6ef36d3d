//! Docker Engine API implementation of [`ContainerEngine`].
//!
//! Talks to the local Docker daemon via `bollard`. The router never creates
//! or removes containers — deployers provision them out of band — so this
//! adapter only inspects, starts, and stops by name.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{StopContainerOptions, KillContainerOptions};
use bollard::Docker;

use super::{ContainerEngine, ContainerState};

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn state(&self, container_name: &str) -> anyhow::Result<ContainerState> {
        match self.docker.inspect_container(container_name, None).await {
            Ok(info) => {
                let running = info
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                Ok(if running {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                })
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(ContainerState::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self, container_name: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(container_name, None::<bollard::container::StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, container_name: &str, timeout: Duration) -> anyhow::Result<()> {
        let opts = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        match self.docker.stop_container(container_name, Some(opts)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(container = container_name, error = %e, "graceful stop failed, force-killing");
                self.docker
                    .kill_container(container_name, None::<KillContainerOptions<String>>)
                    .await?;
                Ok(())
            }
        }
    }
}
