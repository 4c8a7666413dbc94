// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI runtime.
//!
//! Shells out to the `docker` binary for every operation.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::*;

/// Container runtime backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Run a docker subcommand and return trimmed stdout.
    async fn docker(&self, args: &[String]) -> Result<String> {
        debug!(bin = %self.bin, args = ?args, "Running docker");
        let output = Command::new(&self.bin).args(args).output().await?;
        if !output.status.success() {
            return Err(RunnerError::CommandFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Arguments of `docker run` for a detached task container.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--detach".to_string()];

    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    if let Some(runtime) = &spec.runtime {
        args.push(format!("--runtime={}", runtime));
    }
    if let Some(user) = &spec.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }
    if let Some(dir) = &spec.working_dir {
        args.push("--workdir".to_string());
        args.push(dir.clone());
    }
    for mount in &spec.mounts {
        args.push("--volume".to_string());
        args.push(format!(
            "{}:{}:{}",
            mount.source.display(),
            mount.destination,
            mount.mode.as_str()
        ));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.extend(spec.extra_args.iter().cloned());
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        info!(stage = "pre_run", image = %image, "Pulling image");
        self.docker(&["pull".to_string(), image.to_string()])
            .await?;
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        let args = [
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            image.to_string(),
        ];
        match self.docker(&args).await {
            Ok(id) => Ok(!id.is_empty()),
            Err(RunnerError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self.docker(&run_args(spec)).await?;
        if id.is_empty() {
            return Err(RunnerError::SpawnFailed(format!(
                "docker run returned no container id for {}",
                spec.image
            )));
        }
        Ok(id)
    }

    async fn status(&self, container_id: &str) -> Result<ContainerStatus> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            container_id.to_string(),
        ];
        match self.docker(&args).await {
            Ok(status) => Ok(ContainerStatus::parse(&status)),
            Err(RunnerError::CommandFailed { stderr, .. }) if stderr.contains("No such") => {
                Err(RunnerError::ContainerNotFound(container_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        self.docker(&["kill".to_string(), container_id.to_string()])
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let args = ["rm".to_string(), "-f".to_string(), container_id.to_string()];
        match self.docker(&args).await {
            Ok(_) => Ok(()),
            Err(RunnerError::CommandFailed { stderr, .. }) if stderr.contains("No such") => {
                Err(RunnerError::ContainerNotFound(container_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
