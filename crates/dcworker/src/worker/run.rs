// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task launch.

use std::collections::BTreeMap;

use tracing::info;

use super::Worker;
use crate::config::MachineType;
use crate::context::{ExecutionHandle, TaskContext};
use crate::error::Result;
use crate::layout::{
    CONTAINER_CODE_DIR, CONTAINER_DATASET_DIR, CONTAINER_LOG_DIR, CONTAINER_OUTPUT_DIR,
    ENTRY_POINT, is_non_empty_file,
};
use crate::log_stream::{LogStreamConfig, LogStreamer};
use crate::runner::{BindMount, ContainerOverrides, ContainerSpec, MountMode, process};

const CONTAINER_PROFILE: &str = "/home/dcworker/.profile";
const CONDA_ENV: &str = "deepcluster";

/// Paths the task sees, host or in-container.
struct TaskPaths {
    dataset: String,
    code: String,
    output: String,
    log: String,
}

impl Worker {
    /// Start the task and attach a log streamer to it.
    pub async fn run(&mut self, overrides: Option<&ContainerOverrides>) -> Result<()> {
        let token = self.require_identity()?.auth_token.clone();
        let task = self.require_task()?;
        let task_uuid = task.task_uuid.clone();
        let job_uuid = task.job_uuid.clone();

        let handle = match self.config.machine_type {
            MachineType::Provisioned => self.spawn_process()?,
            MachineType::Standard => self.launch_container(overrides).await?,
        };
        info!(stage = "run", task_uuid = %task_uuid, handle = ?handle, "Task started");

        let mut context = TaskContext::new(handle, &self.layout.log_dir());
        context.attach_log_streamer(LogStreamer::spawn(
            self.master.clone(),
            token,
            LogStreamConfig::user_log(
                job_uuid,
                task_uuid.clone(),
                self.layout.user_log_file(&task_uuid),
                self.config.log_stream_interval,
            ),
        ));
        self.context = Some(context);
        Ok(())
    }

    /// Variables handed to the entry point.
    fn task_env(&self, paths: &TaskPaths) -> Result<BTreeMap<String, String>> {
        let task = self.require_task()?;
        let mut env = BTreeMap::new();
        env.insert("TASK_UUID".to_string(), task.task_uuid.clone());
        env.insert("TASK_INDEX".to_string(), task.task_index.to_string());
        env.insert("CLUSTER_SPEC".to_string(), task.cluster_spec_json());
        env.insert("WORKER_TYPE".to_string(), self.config.worker_type.to_string());
        env.insert("RESOURCE_ID".to_string(), self.config.resource_id.to_string());
        env.insert("TASK_ROLE".to_string(), task.task_role.as_str().to_string());
        env.insert("DATASET".to_string(), paths.dataset.clone());
        env.insert("CODE".to_string(), paths.code.clone());
        env.insert("OUTPUT".to_string(), paths.output.clone());
        env.insert("LOG".to_string(), paths.log.clone());
        env.insert("COMMAND".to_string(), task.command_json());
        Ok(env)
    }

    fn spawn_process(&self) -> Result<ExecutionHandle> {
        let task = self.require_task()?;
        let dataset = task
            .dataset_local_path
            .clone()
            .unwrap_or_else(|| self.config.data_dir.clone());
        let paths = TaskPaths {
            dataset: dataset.display().to_string(),
            code: self.layout.code_dir().display().to_string(),
            output: self.layout.output_dir().display().to_string(),
            log: self.layout.log_dir().display().to_string(),
        };
        let env = self.task_env(&paths)?;

        let child = process::spawn_process(
            &self.config.python_bin,
            &[ENTRY_POINT],
            &self.layout.code_dir(),
            &env,
        )?;
        Ok(ExecutionHandle::Process(child))
    }

    async fn launch_container(
        &self,
        overrides: Option<&ContainerOverrides>,
    ) -> Result<ExecutionHandle> {
        let spec = self.container_spec(overrides).await?;
        let id = self.runtime.run_detached(&spec).await?;
        Ok(ExecutionHandle::Container {
            id,
            runtime: self.runtime.clone(),
        })
    }

    /// Container definition for the current task.
    pub async fn container_spec(
        &self,
        overrides: Option<&ContainerOverrides>,
    ) -> Result<ContainerSpec> {
        let task = self.require_task()?;
        let paths = TaskPaths {
            dataset: CONTAINER_DATASET_DIR.to_string(),
            code: CONTAINER_CODE_DIR.to_string(),
            output: CONTAINER_OUTPUT_DIR.to_string(),
            log: CONTAINER_LOG_DIR.to_string(),
        };

        let mut mounts = vec![
            BindMount {
                source: self.layout.code_dir(),
                destination: CONTAINER_CODE_DIR.to_string(),
                mode: MountMode::ReadWrite,
            },
            BindMount {
                source: self.layout.output_dir(),
                destination: CONTAINER_OUTPUT_DIR.to_string(),
                mode: MountMode::ReadWrite,
            },
            BindMount {
                source: self.layout.log_dir(),
                destination: CONTAINER_LOG_DIR.to_string(),
                mode: MountMode::ReadWrite,
            },
        ];
        if let Some(dataset) = &task.dataset_local_path {
            mounts.push(BindMount {
                source: dataset.clone(),
                destination: CONTAINER_DATASET_DIR.to_string(),
                mode: MountMode::ReadWrite,
            });
        }
        for (name, path) in &task.known_datasets {
            mounts.push(BindMount {
                source: path.clone(),
                destination: format!("{}/{}", CONTAINER_DATASET_DIR, name),
                mode: MountMode::ReadOnly,
            });
        }

        let mut script = format!(". {} && conda activate {}", CONTAINER_PROFILE, CONDA_ENV);
        if is_non_empty_file(&self.layout.requirements_file()).await {
            script.push_str(&format!(
                " && conda install --yes --file {}/requirements.txt",
                CONTAINER_CODE_DIR
            ));
        }
        script.push_str(&format!(" && python {}", ENTRY_POINT));

        let mut env = overrides.map(|o| o.env.clone()).unwrap_or_default();
        env.extend(self.task_env(&paths)?);

        Ok(ContainerSpec {
            image: task.container_image.clone().unwrap_or_default(),
            command: vec!["bash".to_string(), "-c".to_string(), script],
            env,
            mounts,
            name: Some(
                overrides
                    .and_then(|o| o.name.clone())
                    .unwrap_or_else(|| format!("dcworker-{}", task.task_uuid)),
            ),
            user: Some(self.config.container_user.clone()),
            runtime: Some(self.config.container_runtime.clone()).filter(|r| !r.is_empty()),
            working_dir: Some(CONTAINER_CODE_DIR.to_string()),
            extra_args: overrides.map(|o| o.extra_args.clone()).unwrap_or_default(),
        })
    }
}
