// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment preparation before the task starts.

use tokio::process::Command;
use tracing::{info, warn};

use super::Worker;
use crate::config::MachineType;
use crate::error::{Error, Result};
use crate::layout::is_non_empty_file;
use crate::runner::{ImageRef, process};

impl Worker {
    /// Create the output and log directories, then install requirements
    /// (provisioned) or pull the task image (standard).
    pub async fn pre_run(&mut self) -> Result<()> {
        let task = self.require_task()?;
        let task_uuid = task.task_uuid.clone();
        let image = task.container_image.clone();

        for dir in [self.layout.output_dir(), self.layout.log_dir()] {
            tokio::fs::create_dir(&dir)
                .await
                .map_err(|e| Error::Prepare(format!("create {}: {}", dir.display(), e)))?;
        }

        match self.config.machine_type {
            MachineType::Provisioned => self.install_requirements().await,
            MachineType::Standard => {
                let reference = image.filter(|i| !i.trim().is_empty()).ok_or_else(|| {
                    Error::Prepare(format!("task {} has no container image", task_uuid))
                })?;
                self.pull_image(&reference).await
            }
        }
    }

    async fn install_requirements(&self) -> Result<()> {
        let requirements = self.layout.requirements_file();
        if !is_non_empty_file(&requirements).await {
            return Ok(());
        }

        info!(stage = "pre_run", file = %requirements.display(), "Installing requirements");
        let mut command = Command::new(&self.config.conda_bin);
        command
            .args(["install", "--yes", "--file"])
            .arg(&requirements)
            .current_dir(self.layout.code_dir());

        let status = process::run_streaming(command, "pre_run")
            .await
            .map_err(|e| Error::Prepare(format!("requirements install: {}", e)))?;
        if !status.success() {
            warn!(stage = "pre_run", exit_code = ?status.code(), "Requirements install exited with an error");
        }
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let image = ImageRef::parse(reference);
        info!(
            stage = "pre_run",
            image = %image.name,
            tag = image.tag.as_deref().unwrap_or("latest"),
            "Pulling task image"
        );

        self.runtime
            .pull(&image)
            .await
            .map_err(|e| Error::Prepare(format!("pull {}: {}", image, e)))?;

        let exists = self
            .runtime
            .image_exists(&image)
            .await
            .map_err(|e| Error::Prepare(format!("inspect {}: {}", image, e)))?;
        if !exists {
            return Err(Error::Prepare(format!("image {} not found after pull", image)));
        }
        Ok(())
    }
}
