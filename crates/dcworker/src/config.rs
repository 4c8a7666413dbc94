// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration.
//!
//! Built once at process start and handed to [`crate::Worker`]. Every value
//! comes from a `DCWORKER_*` environment variable with a fixed default.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Kind of compute the worker offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    /// CPU-only worker.
    Cpu,
    /// GPU worker.
    Gpu,
}

impl WorkerType {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Cpu => "cpu",
            WorkerType::Gpu => "gpu",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(WorkerType::Cpu),
            "gpu" => Ok(WorkerType::Gpu),
            _ => Err(ConfigError::InvalidWorkerType(s.to_string())),
        }
    }
}

/// Where the worker runs and how it executes tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineType {
    /// Bare-metal machine that drives its own container runtime and shares a
    /// reference-counted dataset cache with other workers.
    Standard,
    /// Machine already running inside a foreign container. Tasks run as a
    /// plain subprocess and datasets are always downloaded fresh.
    Provisioned,
}

impl MachineType {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::Standard => "standard",
            MachineType::Provisioned => "provisioned",
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(MachineType::Standard),
            "provisioned" => Ok(MachineType::Provisioned),
            _ => Err(ConfigError::InvalidMachineType(s.to_string())),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master server endpoint, e.g. `http://127.0.0.1:8000`.
    pub master_endpoint: String,
    /// Local port reported on every poll.
    pub port: u16,
    /// Per-task working directory. Wiped on enroll and cleanup.
    pub workdir: PathBuf,
    /// Root of the shared dataset cache.
    pub data_dir: PathBuf,
    /// Worker uuid from registration.
    pub worker_uuid: Option<String>,
    /// Passcode from registration.
    pub passcode: Option<String>,
    pub worker_type: WorkerType,
    /// GPU index handed to the task, `-1` for none.
    pub resource_id: i64,
    /// Free-form description sent on enroll.
    pub worker_info: String,
    pub machine_type: MachineType,
    /// SQLite file holding the dataset reference table.
    pub dataset_db: PathBuf,
    /// Base URL of the known-dataset catalog (`{base}/{name}.tar.gz`).
    pub known_dataset_url: Option<String>,
    /// JSON file written by `dcworker register`.
    pub identity_file: PathBuf,
    /// Sleep between polls when there is no task.
    pub poll_interval: Duration,
    /// Sleep between dataset readiness checks.
    pub dataset_wait: Duration,
    /// Readiness checks before giving up on a concurrent download.
    pub dataset_wait_attempts: u32,
    /// Retries granted for 5xx responses in the signal loop.
    pub retry_budget: u32,
    /// HTTP timeout for master calls.
    pub request_timeout: Duration,
    /// Container runtime requested for task containers.
    pub container_runtime: String,
    /// Non-root user task containers run as.
    pub container_user: String,
    pub docker_bin: String,
    /// Interpreter for the provisioned entry point.
    pub python_bin: String,
    /// Package manager used to install `requirements.txt` on provisioned machines.
    pub conda_bin: String,
    pub tensorboard_bin: String,
    /// How often the user log file is checked for new lines.
    pub log_stream_interval: Duration,
}

/// Default sleep between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Default retry budget of the signal loop.
pub const DEFAULT_RETRY_BUDGET: u32 = 10;

impl WorkerConfig {
    /// Configuration with every default applied.
    pub fn new(
        master_endpoint: impl Into<String>,
        workdir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let data_dir = data_dir.into();
        Self {
            master_endpoint: master_endpoint.into(),
            port: 8000,
            workdir: workdir.into(),
            dataset_db: data_dir.join("datasets.db"),
            data_dir,
            worker_uuid: None,
            passcode: None,
            worker_type: WorkerType::Gpu,
            resource_id: -1,
            worker_info: String::new(),
            machine_type: MachineType::Standard,
            known_dataset_url: None,
            identity_file: PathBuf::from(".dcworker/identity.json"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            dataset_wait: Duration::from_secs(10),
            dataset_wait_attempts: 60,
            retry_budget: DEFAULT_RETRY_BUDGET,
            request_timeout: Duration::from_secs(30),
            container_runtime: "nvidia".to_string(),
            container_user: "1000".to_string(),
            docker_bin: "docker".to_string(),
            python_bin: "python".to_string(),
            conda_bin: "conda".to_string(),
            tensorboard_bin: "tensorboard".to_string(),
            log_stream_interval: Duration::from_secs(1),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let master_endpoint = get("DCWORKER_MASTER_ENDPOINT")
            .ok_or(ConfigError::MissingEnvVar("DCWORKER_MASTER_ENDPOINT"))?;
        let workdir = get("DCWORKER_WORKDIR").unwrap_or_else(|| ".dcworker/work".to_string());
        let data_dir =
            get("DCWORKER_DATA_DIR").unwrap_or_else(|| ".dcworker/datasets".to_string());

        let mut config = Self::new(master_endpoint, workdir, data_dir);

        if let Some(v) = get("DCWORKER_PORT") {
            config.port = parse("DCWORKER_PORT", &v)?;
        }
        config.worker_uuid = get("DCWORKER_WORKER_UUID");
        config.passcode = get("DCWORKER_PASSCODE");
        if let Some(v) = get("DCWORKER_WORKER_TYPE") {
            config.worker_type = v.parse()?;
        }
        if let Some(v) = get("DCWORKER_RESOURCE_ID") {
            config.resource_id = parse("DCWORKER_RESOURCE_ID", &v)?;
        }
        if let Some(v) = get("DCWORKER_WORKER_INFO") {
            config.worker_info = v;
        }
        if let Some(v) = get("DCWORKER_MACHINE_TYPE") {
            config.machine_type = v.parse()?;
        }
        if let Some(v) = get("DCWORKER_DATASET_DB") {
            config.dataset_db = PathBuf::from(v);
        }
        config.known_dataset_url = get("DCWORKER_KNOWN_DATASET_URL");
        if let Some(v) = get("DCWORKER_IDENTITY_FILE") {
            config.identity_file = PathBuf::from(v);
        }
        if let Some(v) = get("DCWORKER_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(parse("DCWORKER_POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("DCWORKER_DATASET_WAIT_SECS") {
            config.dataset_wait = Duration::from_secs(parse("DCWORKER_DATASET_WAIT_SECS", &v)?);
        }
        if let Some(v) = get("DCWORKER_DATASET_WAIT_ATTEMPTS") {
            config.dataset_wait_attempts = parse("DCWORKER_DATASET_WAIT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("DCWORKER_RETRY_BUDGET") {
            config.retry_budget = parse("DCWORKER_RETRY_BUDGET", &v)?;
        }
        if let Some(v) = get("DCWORKER_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse("DCWORKER_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("DCWORKER_CONTAINER_RUNTIME") {
            config.container_runtime = v;
        }
        if let Some(v) = get("DCWORKER_CONTAINER_USER") {
            config.container_user = v;
        }
        if let Some(v) = get("DCWORKER_DOCKER_BIN") {
            config.docker_bin = v;
        }
        if let Some(v) = get("DCWORKER_PYTHON_BIN") {
            config.python_bin = v;
        }
        if let Some(v) = get("DCWORKER_CONDA_BIN") {
            config.conda_bin = v;
        }
        if let Some(v) = get("DCWORKER_TENSORBOARD_BIN") {
            config.tensorboard_bin = v;
        }
        if let Some(v) = get("DCWORKER_LOG_STREAM_INTERVAL_MS") {
            config.log_stream_interval =
                Duration::from_millis(parse("DCWORKER_LOG_STREAM_INTERVAL_MS", &v)?);
        }

        Ok(config)
    }

    /// Whether worker uuid and passcode are both known.
    pub fn has_credentials(&self) -> bool {
        self.worker_uuid.is_some() && self.passcode.is_some()
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// Worker type is neither `cpu` nor `gpu`.
    #[error("Unsupported worker type: '{0}'")]
    InvalidWorkerType(String),
    /// Machine type is neither `standard` nor `provisioned`.
    #[error("Unsupported machine type: '{0}'")]
    InvalidMachineType(String),
}
