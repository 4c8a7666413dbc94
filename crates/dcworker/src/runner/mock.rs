// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container runtime for testing.
//!
//! Records every pull, launch and kill. Launched containers report
//! `Running` until killed or until a status is set explicitly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;

#[derive(Debug, Default)]
struct MockState {
    pulled: Vec<String>,
    missing_images: HashSet<String>,
    fail_pull: bool,
    launched: Vec<(String, ContainerSpec)>,
    statuses: HashMap<String, ContainerStatus>,
    killed: Vec<String>,
    removed: Vec<String>,
}

/// Mock container runtime for testing.
#[derive(Debug, Default, Clone)]
pub struct MockContainerRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockContainerRuntime {
    /// Create a mock where every pull succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose pulls all fail.
    pub fn failing_pull() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                fail_pull: true,
                ..Default::default()
            })),
        }
    }

    /// Make an image unresolvable after pull.
    pub async fn remove_image(&self, reference: &str) {
        self.state
            .lock()
            .await
            .missing_images
            .insert(reference.to_string());
    }

    /// Force the status of a launched container.
    pub async fn set_status(&self, container_id: &str, status: ContainerStatus) {
        self.state
            .lock()
            .await
            .statuses
            .insert(container_id.to_string(), status);
    }

    /// Mark every container that still exists as exited.
    pub async fn exit_all(&self) {
        let mut state = self.state.lock().await;
        for status in state.statuses.values_mut() {
            *status = ContainerStatus::Exited;
        }
    }

    /// Image references pulled, in order.
    pub async fn pulled(&self) -> Vec<String> {
        self.state.lock().await.pulled.clone()
    }

    /// Specs of launched containers, in order.
    pub async fn launched(&self) -> Vec<ContainerSpec> {
        self.state
            .lock()
            .await
            .launched
            .iter()
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    /// Ids of launched containers, in order.
    pub async fn container_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .launched
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of killed containers, in order.
    pub async fn killed(&self) -> Vec<String> {
        self.state.lock().await.killed.clone()
    }

    /// Ids of removed containers, in order.
    pub async fn removed(&self) -> Vec<String> {
        self.state.lock().await.removed.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_pull {
            return Err(RunnerError::CommandFailed {
                command: format!("pull {}", image),
                exit_code: Some(1),
                stderr: "mock pull failure".to_string(),
            });
        }
        state.pulled.push(image.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        let state = self.state.lock().await;
        let reference = image.to_string();
        Ok(state.pulled.contains(&reference) && !state.missing_images.contains(&reference))
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = format!("mock-container-{}", state.launched.len() + 1);
        state.launched.push((id.clone(), spec.clone()));
        state.statuses.insert(id.clone(), ContainerStatus::Running);
        Ok(id)
    }

    async fn status(&self, container_id: &str) -> Result<ContainerStatus> {
        self.state
            .lock()
            .await
            .statuses
            .get(container_id)
            .cloned()
            .ok_or_else(|| RunnerError::ContainerNotFound(container_id.to_string()))
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.statuses.get_mut(container_id) {
            Some(status) => {
                *status = ContainerStatus::Exited;
                state.killed.push(container_id.to_string());
                Ok(())
            }
            None => Err(RunnerError::ContainerNotFound(container_id.to_string())),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.statuses.remove(container_id) {
            Some(_) => {
                state.removed.push(container_id.to_string());
                Ok(())
            }
            None => Err(RunnerError::ContainerNotFound(container_id.to_string())),
        }
    }
}
