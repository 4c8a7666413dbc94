// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-of-task cleanup.

use std::io;

use dcworker_master::{TaskAction, TaskActionRequest};
use tracing::{error, info, warn};

use super::Worker;
use super::post_run::stop_tensorboard;
use crate::layout::dataset_path;

impl Worker {
    /// Release everything the current task holds and forget it.
    ///
    /// Reports `failed` for a task the master has not seen finish. Returns
    /// false when that report did not go through. Never fails; a second call
    /// finds nothing to do.
    pub async fn task_cleanup(&mut self) -> bool {
        let mut ok = true;

        if let Some(mut context) = self.context.take() {
            context.terminate().await;
        }
        if let Err(e) = self.layout.wipe().await {
            warn!(stage = "cleanup", error = %e, "Failed to wipe working directory");
        }

        let finished = self.task.as_ref().is_some_and(|t| t.finished);
        match self.task_uuid.clone() {
            Some(task_uuid) if !finished => ok = self.report_failed(&task_uuid).await,
            Some(_) => {}
            None => warn!(stage = "cleanup", "No task uuid to clean up"),
        }

        if let Some(mut task) = self.task.take() {
            for name in std::mem::take(&mut task.claimed_datasets) {
                match self.registry.decrement(&name).await {
                    Ok(true) => {
                        let path = dataset_path(&self.config.data_dir, &name);
                        match tokio::fs::remove_dir_all(&path).await {
                            Ok(()) => info!(stage = "cleanup", dataset = %name, "Dataset evicted"),
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => warn!(
                                stage = "cleanup",
                                dataset = %name,
                                error = %e,
                                "Failed to delete evicted dataset"
                            ),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!(stage = "cleanup", dataset = %name, error = %e, "Failed to release dataset reference")
                    }
                }
            }
            stop_tensorboard(&mut task).await;
        }

        self.task_uuid = None;
        ok
    }

    async fn report_failed(&self, task_uuid: &str) -> bool {
        let Some(identity) = &self.identity else {
            error!(stage = "cleanup", task_uuid, "Cannot report failed task, not enrolled");
            return false;
        };

        let request = TaskActionRequest {
            task_uuid: task_uuid.to_string(),
            action: TaskAction::Failed,
        };
        match self.master.task_action(&identity.auth_token, &request).await {
            Ok(response) if response.status < 300 => {
                info!(stage = "cleanup", task_uuid, "Task reported as failed");
                true
            }
            Ok(response) => {
                error!(
                    stage = "cleanup",
                    task_uuid,
                    status = response.status,
                    error = %response.error_message(),
                    "Master rejected failure report"
                );
                false
            }
            Err(e) => {
                error!(stage = "cleanup", task_uuid, error = %e, "Failed to report task failure");
                false
            }
        }
    }
}
