// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upload of task output and logs.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::Worker;
use crate::error::Result;
use crate::layout::{WorkLayout, dir_has_entries, is_non_empty_file};
use crate::task::TaskDescriptor;
use crate::transfer;

impl Worker {
    /// Ship the output directory and the log, then stop tensorboard.
    ///
    /// With `local_output_folder` the files are copied there instead of
    /// uploaded. Never fails; problems are logged.
    pub async fn post_run(&mut self, local_output_folder: Option<&Path>) {
        let Some(task_uuid) = self.task.as_ref().map(|t| t.task_uuid.clone()) else {
            warn!(stage = "post_run", "No task to upload results for");
            return;
        };

        let output_dir = self.layout.output_dir();
        let user_log = self.layout.user_log_file(&task_uuid);
        let has_output = dir_has_entries(&output_dir).await;
        let has_log = is_non_empty_file(&user_log).await;

        if !has_output && !has_log {
            info!(stage = "post_run", task_uuid = %task_uuid, "Nothing to upload");
        } else if let Some(folder) = local_output_folder {
            if let Err(e) = self.copy_results(folder, &task_uuid).await {
                warn!(stage = "post_run", folder = %folder.display(), error = %e, "Failed to copy results");
            }
        } else {
            self.upload_results(&task_uuid, has_output, has_log).await;
        }

        if let Some(task) = self.task.as_mut() {
            stop_tensorboard(task).await;
        }
    }

    async fn copy_results(&self, folder: &Path, task_uuid: &str) -> Result<()> {
        tokio::fs::create_dir_all(folder).await?;

        let output_dir = self.layout.output_dir();
        if tokio::fs::metadata(&output_dir).await.is_ok_and(|m| m.is_dir()) {
            transfer::copy_dir_recursive(&output_dir, &folder.join("output")).await?;
        }

        let user_log = self.layout.user_log_file(task_uuid);
        if is_non_empty_file(&user_log).await {
            tokio::fs::copy(&user_log, folder.join(WorkLayout::user_log_file_name(task_uuid)))
                .await?;
        }

        info!(stage = "post_run", folder = %folder.display(), "Results copied");
        Ok(())
    }

    async fn upload_results(&self, task_uuid: &str, has_output: bool, has_log: bool) {
        let Some(target) = self.task.as_ref().and_then(|t| t.output_upload_urls.clone()) else {
            error!(stage = "post_run", task_uuid, "No upload URLs from the master, results are lost");
            return;
        };

        let uploads = [
            (
                has_output,
                self.layout.output_dir(),
                self.layout.output_tar(task_uuid),
                WorkLayout::output_tar_name(task_uuid),
            ),
            (
                has_log,
                self.layout.log_dir(),
                self.layout.log_tar(task_uuid),
                WorkLayout::log_tar_name(task_uuid),
            ),
        ];

        for (wanted, source, archive, name) in uploads {
            if !wanted {
                debug!(stage = "upload", file = %name, "Nothing to archive");
                continue;
            }
            let result = async {
                transfer::create_tar_gz(&source, &archive).await?;
                transfer::upload_presigned(&self.http, &target, &archive, &name).await
            }
            .await;
            match result {
                Ok(()) => info!(stage = "upload", file = %name, "Uploaded"),
                Err(e) => warn!(stage = "upload", file = %name, error = %e, "Upload failed"),
            }
        }
    }
}

pub(super) async fn stop_tensorboard(task: &mut TaskDescriptor) {
    if let Some(mut child) = task.tensorboard.take() {
        if let Err(e) = child.kill().await {
            warn!(stage = "tensorboard", error = %e, "Failed to stop tensorboard");
        } else {
            info!(stage = "tensorboard", "Tensorboard stopped");
        }
    }
}
