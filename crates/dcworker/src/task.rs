// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task descriptor parsed from the poll `config` blob.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use dcworker_master::PresignedPost;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::process::Child;

use crate::error::{Error, Result};

/// Role of the task in the training cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRole {
    /// Trains on data; the only role that downloads datasets.
    Worker,
    /// Parameter server.
    Ps,
}

impl TaskRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRole::Worker => "worker",
            TaskRole::Ps => "ps",
        }
    }
}

/// `(hint, url)`: file name to write and presigned GET URL.
pub type DownloadPair = (String, String);

/// Per-job dataset uploaded by the user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomDataset {
    pub url: Vec<DownloadPair>,
    /// Directory name under the data dir, normally the job uuid.
    pub dataset_name: String,
}

/// Where to fetch code and data from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadInfo {
    pub code: Vec<DownloadPair>,
    #[serde(default)]
    pub known_datasets: Option<Vec<String>>,
    #[serde(default, alias = "dataset")]
    pub custom_dataset: Option<CustomDataset>,
}

#[derive(Debug, Deserialize)]
struct TaskConfig {
    task_uuid: String,
    job_uuid: String,
    task_role: TaskRole,
    task_index: u32,
    #[serde(default = "empty_object")]
    cluster_spec: Value,
    #[serde(default)]
    command: Value,
    #[serde(default)]
    container_image: Option<String>,
    download_info: DownloadInfo,
    #[serde(default = "default_keep_alive", deserialize_with = "seconds")]
    keep_alive_interval: u64,
    #[serde(default = "default_true")]
    signal_finish: bool,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_keep_alive() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Accepts `30` as well as `"30"`.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// The task currently owned by the worker.
///
/// Static fields come from the master. The rest is filled in by the fetch
/// and signal stages.
#[derive(Debug)]
pub struct TaskDescriptor {
    pub task_uuid: String,
    pub job_uuid: String,
    pub task_role: TaskRole,
    pub task_index: u32,
    pub cluster_spec: Value,
    pub command: Value,
    pub container_image: Option<String>,
    pub download_info: DownloadInfo,
    pub keep_alive_interval: Duration,
    pub signal_finish: bool,

    /// Set once the master knows the outcome of the task.
    pub finished: bool,
    /// Upload target handed out by the master on stop/finish.
    pub output_upload_urls: Option<PresignedPost>,
    /// Local path of the custom dataset.
    pub dataset_local_path: Option<PathBuf>,
    /// Known dataset name to local path.
    pub known_datasets: BTreeMap<String, PathBuf>,
    /// Dataset references taken in the shared table, released at cleanup.
    pub claimed_datasets: Vec<String>,
    pub tensorboard: Option<Child>,
}

impl TaskDescriptor {
    /// Parse the JSON text of a task config.
    pub fn from_config_str(config: &str) -> Result<Self> {
        let parsed: TaskConfig = serde_json::from_str(config)
            .map_err(|e| Error::MalformedTaskConfig(e.to_string()))?;
        Ok(Self::from_config(parsed))
    }

    /// Parse the `config` field of a poll response body.
    ///
    /// The field is normally a JSON string; an embedded object is accepted too.
    pub fn from_poll_body(body: &Value) -> Result<Self> {
        match body.get("config") {
            Some(Value::String(s)) => Self::from_config_str(s),
            Some(obj @ Value::Object(_)) => {
                let parsed: TaskConfig = serde_json::from_value(obj.clone())
                    .map_err(|e| Error::MalformedTaskConfig(e.to_string()))?;
                Ok(Self::from_config(parsed))
            }
            Some(other) => Err(Error::MalformedTaskConfig(format!(
                "'config' must be a JSON string, got {}",
                other
            ))),
            None => Err(Error::MalformedTaskConfig(
                "missing 'config' in poll response".to_string(),
            )),
        }
    }

    /// Best-effort task uuid from a poll body whose config did not parse.
    pub fn recover_task_uuid(body: &Value) -> Option<String> {
        let config = match body.get("config")? {
            Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
            other => other.clone(),
        };
        config
            .get("task_uuid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn from_config(config: TaskConfig) -> Self {
        Self {
            task_uuid: config.task_uuid,
            job_uuid: config.job_uuid,
            task_role: config.task_role,
            task_index: config.task_index,
            cluster_spec: config.cluster_spec,
            command: config.command,
            container_image: config.container_image,
            download_info: config.download_info,
            keep_alive_interval: Duration::from_secs(config.keep_alive_interval),
            signal_finish: config.signal_finish,
            finished: false,
            output_upload_urls: None,
            dataset_local_path: None,
            known_datasets: BTreeMap::new(),
            claimed_datasets: Vec::new(),
            tensorboard: None,
        }
    }

    /// Only the worker role trains on data.
    pub fn uses_datasets(&self) -> bool {
        self.task_role == TaskRole::Worker
    }

    /// `CLUSTER_SPEC` as handed to the task.
    pub fn cluster_spec_json(&self) -> String {
        self.cluster_spec.to_string()
    }

    /// `COMMAND` as handed to the task.
    pub fn command_json(&self) -> String {
        self.command.to_string()
    }
}
