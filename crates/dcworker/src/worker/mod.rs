// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The worker agent.
//!
//! One [`Worker`] owns at most one task at a time and moves it through the
//! stages in order:
//!
//! ```text
//! enroll → poll → fetch → pre_run → run → signal → post_run → task_cleanup
//!            ↑                                                     │
//!            └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each stage lives in its own submodule as an `impl Worker` block.
//! [`Worker::run_until`] drives the loop; the stage methods are public so
//! callers and tests can step through a task by hand.

mod cleanup;
mod enroll;
mod fetch;
mod lifecycle;
mod poll;
mod post_run;
mod prepare;
mod run;
mod signal;

use std::sync::Arc;

use dcworker_master::{HttpMasterClient, MasterApi, MasterConfig};
use tracing::warn;

use crate::config::WorkerConfig;
use crate::context::TaskContext;
use crate::dataset_registry::DatasetRegistry;
use crate::error::{Error, Result};
use crate::identity::WorkerIdentity;
use crate::known_datasets::{HttpKnownDatasets, KnownDatasetSource, NoKnownDatasets};
use crate::layout::WorkLayout;
use crate::runner::{ContainerRuntime, DockerCli};
use crate::task::TaskDescriptor;

pub use poll::PollOutcome;
pub use signal::{SignalReport, SignalState};

/// Builder for [`Worker`].
pub struct WorkerBuilder {
    config: WorkerConfig,
    registry: Arc<dyn DatasetRegistry>,
    master: Option<Arc<dyn MasterApi>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    known_datasets: Option<Arc<dyn KnownDatasetSource>>,
    http: Option<reqwest::Client>,
}

impl WorkerBuilder {
    /// Set the master client.
    ///
    /// Default: [`HttpMasterClient`] for `config.master_endpoint`.
    pub fn master(mut self, master: Arc<dyn MasterApi>) -> Self {
        self.master = Some(master);
        self
    }

    /// Set the container runtime.
    ///
    /// Default: [`DockerCli`] using `config.docker_bin`.
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the known-dataset source.
    ///
    /// Default: [`HttpKnownDatasets`] when `config.known_dataset_url` is set,
    /// otherwise [`NoKnownDatasets`].
    pub fn known_datasets(mut self, source: Arc<dyn KnownDatasetSource>) -> Self {
        self.known_datasets = Some(source);
        self
    }

    /// Set the HTTP client used for presigned transfers.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(mut self) -> Result<Worker> {
        // Bind mount sources must be absolute or docker takes them for volume names.
        self.config.workdir = std::path::absolute(&self.config.workdir)?;
        self.config.data_dir = std::path::absolute(&self.config.data_dir)?;

        let http = match self.http {
            Some(http) => http,
            // No total timeout: datasets can take a long time to download.
            None => reqwest::Client::builder()
                .connect_timeout(self.config.request_timeout)
                .build()?,
        };

        let master = match self.master {
            Some(master) => master,
            None => {
                let config = MasterConfig::new(self.config.master_endpoint.clone())?
                    .with_request_timeout(self.config.request_timeout);
                Arc::new(HttpMasterClient::new(config)?)
            }
        };

        let runtime = self
            .runtime
            .unwrap_or_else(|| Arc::new(DockerCli::new(self.config.docker_bin.clone())));

        let known_datasets = match (self.known_datasets, &self.config.known_dataset_url) {
            (Some(source), _) => source,
            (None, Some(url)) => Arc::new(HttpKnownDatasets::new(http.clone(), url.clone())),
            (None, None) => Arc::new(NoKnownDatasets),
        };

        Ok(Worker {
            layout: WorkLayout::new(self.config.workdir.clone()),
            config: self.config,
            master,
            runtime,
            registry: self.registry,
            known_datasets,
            http,
            identity: None,
            task: None,
            task_uuid: None,
            context: None,
        })
    }
}

/// A training worker.
pub struct Worker {
    config: WorkerConfig,
    master: Arc<dyn MasterApi>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn DatasetRegistry>,
    known_datasets: Arc<dyn KnownDatasetSource>,
    http: reqwest::Client,
    layout: WorkLayout,
    identity: Option<WorkerIdentity>,
    task: Option<TaskDescriptor>,
    /// Uuid of the task the master believes we own. Survives a malformed
    /// config so cleanup can still report it.
    task_uuid: Option<String>,
    context: Option<TaskContext>,
}

impl Worker {
    pub fn builder(config: WorkerConfig, registry: Arc<dyn DatasetRegistry>) -> WorkerBuilder {
        WorkerBuilder {
            config,
            registry,
            master: None,
            runtime: None,
            known_datasets: None,
            http: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    pub fn identity(&self) -> Option<&WorkerIdentity> {
        self.identity.as_ref()
    }

    pub fn is_enrolled(&self) -> bool {
        self.identity.is_some()
    }

    pub fn task(&self) -> Option<&TaskDescriptor> {
        self.task.as_ref()
    }

    pub fn task_uuid(&self) -> Option<&str> {
        self.task_uuid.as_deref()
    }

    pub fn context(&self) -> Option<&TaskContext> {
        self.context.as_ref()
    }

    fn require_identity(&self) -> Result<&WorkerIdentity> {
        self.identity.as_ref().ok_or(Error::NotEnrolled)
    }

    fn require_task(&self) -> Result<&TaskDescriptor> {
        self.task.as_ref().ok_or(Error::NoTask)
    }

    /// Forget the current task, stopping whatever still runs for it.
    async fn reset_task(&mut self) {
        if let Some(mut context) = self.context.take() {
            warn!(stage = "poll", "Discarding a task context that was never cleaned up");
            context.terminate().await;
        }
        self.task = None;
        self.task_uuid = None;
        self.context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset_registry::SqliteDatasetRegistry;
    use crate::layout::dataset_path;
    use crate::runner::MockContainerRuntime;
    use dcworker_master::MockMaster;
    use serde_json::json;

    async fn worker_with_relative_dirs() -> Worker {
        let config = WorkerConfig::new("http://master.test", "work", "datasets");
        let registry = SqliteDatasetRegistry::in_memory().await.unwrap();
        Worker::builder(config, Arc::new(registry))
            .master(Arc::new(MockMaster::new()))
            .runtime(Arc::new(MockContainerRuntime::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_relative_directories_made_absolute() {
        let worker = worker_with_relative_dirs().await;
        let cwd = std::env::current_dir().unwrap();

        assert_eq!(worker.config().workdir, cwd.join("work"));
        assert_eq!(worker.config().data_dir, cwd.join("datasets"));
        assert!(worker.layout().code_dir().is_absolute());
    }

    #[tokio::test]
    async fn test_container_mount_sources_are_absolute() {
        let mut worker = worker_with_relative_dirs().await;
        let config = json!({
            "task_uuid": "t-1",
            "job_uuid": "job-1",
            "container_image": "dc/tf:1.14",
            "download_info": {"code": []}
        });
        let mut task = TaskDescriptor::from_config_str(&config.to_string()).unwrap();
        task.known_datasets
            .insert("mnist".to_string(), dataset_path(&worker.config.data_dir, "mnist"));
        task.dataset_local_path = Some(dataset_path(&worker.config.data_dir, "job-1"));
        worker.task = Some(task);

        let spec = worker.container_spec(None).await.unwrap();
        assert_eq!(spec.mounts.len(), 5);
        for mount in &spec.mounts {
            assert!(
                mount.source.is_absolute(),
                "{} is not absolute",
                mount.source.display()
            );
        }
    }
}
