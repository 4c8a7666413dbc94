// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Download of named, pre-seeded datasets.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::transfer;

/// Source of known datasets, addressed by name.
#[async_trait]
pub trait KnownDatasetSource: Send + Sync {
    /// Materialize `dataset_name` into `destination` (created if missing).
    async fn download(&self, dataset_name: &str, destination: &Path) -> Result<()>;
}

/// Catalog served over HTTP as `{base_url}/{name}.tar.gz`.
#[derive(Debug, Clone)]
pub struct HttpKnownDatasets {
    http: reqwest::Client,
    base_url: String,
}

impl HttpKnownDatasets {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn archive_url(&self, dataset_name: &str) -> String {
        format!("{}/{}.tar.gz", self.base_url, dataset_name)
    }
}

#[async_trait]
impl KnownDatasetSource for HttpKnownDatasets {
    async fn download(&self, dataset_name: &str, destination: &Path) -> Result<()> {
        tokio::fs::create_dir_all(destination).await?;

        let url = self.archive_url(dataset_name);
        let archive = destination.join(format!("{}.tar.gz", dataset_name));
        transfer::download_to_file(&self.http, &url, &archive).await?;
        transfer::extract_tar_gz(&archive, destination).await?;
        tokio::fs::remove_file(&archive).await?;

        info!(stage = "fetch", dataset = dataset_name, "Known dataset downloaded");
        Ok(())
    }
}

/// Used when no catalog URL is configured; every download fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnownDatasets;

#[async_trait]
impl KnownDatasetSource for NoKnownDatasets {
    async fn download(&self, dataset_name: &str, _destination: &Path) -> Result<()> {
        Err(Error::Fetch(format!(
            "known dataset '{}' requested but DCWORKER_KNOWN_DATASET_URL is not set",
            dataset_name
        )))
    }
}
