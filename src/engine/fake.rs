//! In-memory [`ContainerEngine`] test double.
//!
//! Lets controller/reaper tests exercise start/stop/preemption sequencing
//! without a Docker daemon. Container existence and running state are
//! tracked in a simple map; `start`/`stop` can be configured to fail on
//! specific names to exercise retry and error paths.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use super::{ContainerEngine, ContainerState};

pub struct FakeContainerEngine {
    states: Mutex<HashMap<String, ContainerState>>,
    fail_start: Mutex<Vec<String>>,
    start_calls: Mutex<Vec<String>>,
    stop_calls: Mutex<Vec<String>>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            fail_start: Mutex::new(Vec::new()),
            start_calls: Mutex::new(Vec::new()),
            stop_calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed a container as present with the given initial state.
    pub fn with_container(self, name: &str, state: ContainerState) -> Self {
        self.states.lock().unwrap().insert(name.to_string(), state);
        self
    }

    /// Configure `start` to return an error for this container name.
    pub fn fail_start_for(&self, name: &str) {
        self.fail_start.lock().unwrap().push(name.to_string());
    }

    pub fn start_call_count(&self, name: &str) -> usize {
        self.start_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn stop_call_count(&self, name: &str) -> usize {
        self.stop_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn set_running(&self, name: &str) {
        self.set_state(name, ContainerState::Running);
    }

    pub fn set_state(&self, name: &str, state: ContainerState) {
        self.states.lock().unwrap().insert(name.to_string(), state);
    }
}

impl Default for FakeContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn state(&self, container_name: &str) -> anyhow::Result<ContainerState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(container_name)
            .copied()
            .unwrap_or(ContainerState::Missing))
    }

    async fn start(&self, container_name: &str) -> anyhow::Result<()> {
        self.start_calls.lock().unwrap().push(container_name.to_string());
        if self.fail_start.lock().unwrap().contains(&container_name.to_string()) {
            anyhow::bail!("simulated start failure for {container_name}");
        }
        self.states
            .lock()
            .unwrap()
            .insert(container_name.to_string(), ContainerState::Running);
        Ok(())
    }

    async fn stop(&self, container_name: &str, _timeout: Duration) -> anyhow::Result<()> {
        self.stop_calls.lock().unwrap().push(container_name.to_string());
        self.states
            .lock()
            .unwrap()
            .insert(container_name.to_string(), ContainerState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_by_default() {
        let engine = FakeContainerEngine::new();
        assert_eq!(engine.state("x").await.unwrap(), ContainerState::Missing);
    }

    #[tokio::test]
    async fn start_transitions_to_running_and_records_call() {
        let engine = FakeContainerEngine::new().with_container("x", ContainerState::Stopped);
        engine.start("x").await.unwrap();
        assert_eq!(engine.state("x").await.unwrap(), ContainerState::Running);
        assert_eq!(engine.start_call_count("x"), 1);
    }

    #[tokio::test]
    async fn configured_start_failure_is_returned() {
        let engine = FakeContainerEngine::new().with_container("x", ContainerState::Stopped);
        engine.fail_start_for("x");
        assert!(engine.start("x").await.is_err());
    }

    #[tokio::test]
    async fn stop_transitions_to_stopped() {
        let engine = FakeContainerEngine::new().with_container("x", ContainerState::Running);
        engine.stop("x", Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.state("x").await.unwrap(), ContainerState::Stopped);
    }
}
