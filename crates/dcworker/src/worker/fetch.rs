// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code and dataset download.
//!
//! Datasets live in a cache shared by every worker on the machine. On
//! standard machines each dataset is guarded by a row in the coordination
//! table:
//!
//! 1. wait while another worker is still downloading it (row present, not
//!    ready), up to `dataset_wait_attempts` times;
//! 2. take a reference (upsert, `ref_count + 1`);
//! 3. if the row was not ready, download and mark it ready;
//! 4. on download failure delete the row and the directory.
//!
//! References are released in [`Worker::task_cleanup`]. Known datasets are
//! persisted and never evicted; custom datasets are removed with their last
//! reference. Provisioned machines skip the table and always download.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::Worker;
use crate::config::MachineType;
use crate::error::{Error, Result};
use crate::layout::dataset_path;
use crate::task::{CustomDataset, DownloadPair};
use crate::transfer;

impl Worker {
    /// Download the task's code and, for the worker role, its datasets.
    pub async fn fetch(&mut self, download_code: bool, download_dataset: bool) -> Result<()> {
        let task = self.require_task()?;
        let task_uuid = task.task_uuid.clone();
        let code = task.download_info.code.clone();
        let uses_datasets = task.uses_datasets();
        let known = task
            .download_info
            .known_datasets
            .clone()
            .unwrap_or_default();
        let custom = task.download_info.custom_dataset.clone();

        if download_code {
            self.fetch_code(&code)
                .await
                .map_err(|e| Error::Fetch(format!("code: {}", e)))?;
            info!(stage = "fetch", task_uuid = %task_uuid, files = code.len(), "Code downloaded");
        }

        if !download_dataset {
            return Ok(());
        }
        if !uses_datasets {
            debug!(stage = "fetch", task_uuid = %task_uuid, "Role does not use datasets");
            return Ok(());
        }

        for name in &known {
            self.fetch_known_dataset(name).await?;
        }
        if let Some(dataset) = &custom {
            self.fetch_custom_dataset(dataset).await?;
        }
        Ok(())
    }

    async fn fetch_code(&self, pairs: &[DownloadPair]) -> Result<()> {
        let code_dir = self.layout.code_dir();
        tokio::fs::create_dir_all(&code_dir).await?;
        transfer::download_presigned(&self.http, &code_dir, pairs).await?;
        transfer::extract_archives_in_dir(&code_dir).await
    }

    async fn fetch_known_dataset(&mut self, name: &str) -> Result<()> {
        let path = self.dataset_dir(name)?;
        let present = self.claim_dataset(name, &path, true).await?;

        if present {
            info!(stage = "fetch", dataset = name, "Known dataset already present");
        } else {
            info!(stage = "fetch", dataset = name, path = %path.display(), "Downloading known dataset");
            let result = self.known_datasets.download(name, &path).await;
            self.settle_download(name, &path, result).await?;
        }

        if let Some(task) = self.task.as_mut() {
            task.known_datasets.insert(name.to_string(), path);
        }
        Ok(())
    }

    async fn fetch_custom_dataset(&mut self, dataset: &CustomDataset) -> Result<()> {
        let name = dataset.dataset_name.as_str();
        let path = self.dataset_dir(name)?;
        let present = self.claim_dataset(name, &path, false).await?;

        if present {
            info!(stage = "fetch", dataset = name, "Custom dataset already present");
        } else {
            info!(stage = "fetch", dataset = name, path = %path.display(), "Downloading custom dataset");
            let result = self.download_custom(&dataset.url, &path).await;
            self.settle_download(name, &path, result).await?;
        }

        if let Some(task) = self.task.as_mut() {
            task.dataset_local_path = Some(path);
        }
        Ok(())
    }

    async fn download_custom(&self, pairs: &[DownloadPair], path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        transfer::download_presigned(&self.http, path, pairs).await?;
        transfer::extract_archives_in_dir(path).await
    }

    fn dataset_dir(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(dataset_path(&self.config.data_dir, name)),
            _ => Err(Error::Fetch(format!("invalid dataset name '{}'", name))),
        }
    }

    /// Take a reference on a dataset, waiting for a concurrent download.
    ///
    /// Returns whether the dataset was already downloaded.
    async fn claim_dataset(&mut self, name: &str, path: &Path, persisted: bool) -> Result<bool> {
        if self.config.machine_type == MachineType::Provisioned {
            return Ok(false);
        }

        let mut row = self.registry.query(name).await?;
        let mut attempts = 0;
        while matches!(&row, Some(r) if !r.is_ready) && attempts < self.config.dataset_wait_attempts
        {
            debug!(stage = "fetch", dataset = name, attempts, "Waiting for dataset download by another worker");
            tokio::time::sleep(self.config.dataset_wait).await;
            attempts += 1;
            row = self.registry.query(name).await?;
        }

        let already_present = row.as_ref().is_some_and(|r| r.is_ready);
        if !already_present && row.is_some() {
            warn!(stage = "fetch", dataset = name, "Gave up waiting for dataset, downloading");
        }

        self.registry.increment(name, path, persisted).await?;
        if let Some(task) = self.task.as_mut() {
            task.claimed_datasets.push(name.to_string());
        }
        Ok(already_present)
    }

    async fn settle_download(&mut self, name: &str, path: &Path, result: Result<()>) -> Result<()> {
        let standard = self.config.machine_type == MachineType::Standard;

        let e = match result {
            Ok(()) => {
                if standard {
                    self.registry.mark_ready(name).await?;
                }
                info!(stage = "fetch", dataset = name, "Dataset ready");
                return Ok(());
            }
            Err(e) => e,
        };

        error!(stage = "fetch", dataset = name, error = %e, "Dataset download failed");
        if standard && let Err(re) = self.registry.remove(name).await {
            warn!(stage = "fetch", dataset = name, error = %re, "Failed to delete dataset row");
        }
        if let Some(task) = self.task.as_mut()
            && let Some(pos) = task.claimed_datasets.iter().rposition(|n| n == name)
        {
            task.claimed_datasets.remove(pos);
        }
        if let Err(re) = tokio::fs::remove_dir_all(path).await
            && re.kind() != io::ErrorKind::NotFound
        {
            warn!(stage = "fetch", path = %path.display(), error = %re, "Failed to delete dataset directory");
        }

        Err(Error::Fetch(format!("dataset '{}': {}", name, e)))
    }
}
