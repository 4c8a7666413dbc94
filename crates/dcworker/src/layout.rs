// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local and in-container file layout of a task.

use std::io;
use std::path::{Path, PathBuf};

pub const CODE_DIR: &str = "code";
pub const OUTPUT_DIR: &str = "output";
pub const LOG_DIR: &str = "log";
pub const REQUIREMENTS_TXT: &str = "requirements.txt";
/// Written into the log dir by the entry point when user code fails.
pub const FAILURE_MARKER: &str = "worker_failed";

pub const CONTAINER_WORK_DIR: &str = "/runtime";
pub const CONTAINER_DATASET_DIR: &str = "/data";
pub const CONTAINER_CODE_DIR: &str = "/runtime/code";
pub const CONTAINER_OUTPUT_DIR: &str = "/runtime/output";
pub const CONTAINER_LOG_DIR: &str = "/runtime/log";
/// Entry point run for every task, inside a container or on a provisioned host.
pub const ENTRY_POINT: &str = "/runtime/worker_run.py";

/// Paths under the worker's working directory.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join(CODE_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn requirements_file(&self) -> PathBuf {
        self.code_dir().join(REQUIREMENTS_TXT)
    }

    pub fn failure_marker(&self) -> PathBuf {
        self.log_dir().join(FAILURE_MARKER)
    }

    /// `<uuid>.log`
    pub fn user_log_file_name(task_uuid: &str) -> String {
        format!("{}.log", task_uuid)
    }

    /// File the task writes its own log to.
    pub fn user_log_file(&self, task_uuid: &str) -> PathBuf {
        self.log_dir().join(Self::user_log_file_name(task_uuid))
    }

    /// `output_<uuid[..6]>.tar.gz`
    pub fn output_tar_name(task_uuid: &str) -> String {
        format!("output_{}.tar.gz", short_uuid(task_uuid))
    }

    /// `log_<uuid[..6]>.tar.gz`
    pub fn log_tar_name(task_uuid: &str) -> String {
        format!("log_{}.tar.gz", short_uuid(task_uuid))
    }

    pub fn output_tar(&self, task_uuid: &str) -> PathBuf {
        self.root.join(Self::output_tar_name(task_uuid))
    }

    pub fn log_tar(&self, task_uuid: &str) -> PathBuf {
        self.root.join(Self::log_tar_name(task_uuid))
    }

    /// Delete everything inside the working directory, keeping the directory.
    pub async fn wipe(&self) -> io::Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

/// Directory of a dataset in the shared cache.
pub fn dataset_path(data_dir: &Path, dataset_name: &str) -> PathBuf {
    data_dir.join(dataset_name)
}

/// First six characters of a uuid.
pub fn short_uuid(uuid: &str) -> &str {
    match uuid.char_indices().nth(6) {
        Some((idx, _)) => &uuid[..idx],
        None => uuid,
    }
}

/// Whether a directory exists and has at least one entry.
pub async fn dir_has_entries(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Whether a regular file exists and is non-empty.
pub async fn is_non_empty_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
