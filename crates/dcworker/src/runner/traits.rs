// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from container runtime and subprocess operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// A runtime command exited with a non-zero status.
    #[error("`{command}` failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Standard error output.
        stderr: String,
    },

    /// Image could not be resolved locally.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Container is unknown to the runtime.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Process could not be spawned.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// `name[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub tag: Option<String>,
}

impl ImageRef {
    /// Split a reference into name and tag.
    ///
    /// Only a `:` after the last `/` starts a tag, so registry ports stay in
    /// the name (`registry:5000/team/img` has no tag).
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                Self {
                    name: reference[..split].to_string(),
                    tag: Some(reference[split + 1..].to_string()).filter(|t| !t.is_empty()),
                }
            }
            None => Self {
                name: reference.to_string(),
                tag: None,
            },
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.name, tag),
            None => f.write_str(&self.name),
        }
    }
}

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

/// Host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub destination: String,
    pub mode: MountMode,
}

/// Everything needed to start a detached task container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<BindMount>,
    pub name: Option<String>,
    /// User the container runs as.
    pub user: Option<String>,
    /// Runtime requested from the engine, e.g. `nvidia`.
    pub runtime: Option<String>,
    pub working_dir: Option<String>,
    /// Extra arguments passed before the image name.
    pub extra_args: Vec<String>,
}

/// Caller-supplied additions to the container a task runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOverrides {
    /// Container name; defaults to `dcworker-<task uuid>`.
    pub name: Option<String>,
    /// Extra variables. Task variables win on conflict.
    pub env: BTreeMap<String, String>,
    /// Extra engine arguments, e.g. `--shm-size=8g`.
    pub extra_args: Vec<String>,
}

/// State of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }

    /// A task container counts as alive while created or running.
    pub fn is_alive(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running)
    }
}

/// Container engine used on standard machines.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Pull an image from its registry.
    async fn pull(&self, image: &ImageRef) -> Result<()>;

    /// Whether the image resolves locally.
    async fn image_exists(&self, image: &ImageRef) -> Result<bool>;

    /// Start a detached container and return its id.
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String>;

    /// Current state of a container.
    async fn status(&self, container_id: &str) -> Result<ContainerStatus>;

    /// Kill a running container.
    async fn kill(&self, container_id: &str) -> Result<()>;

    /// Delete a container, killing it first if it still runs.
    async fn remove(&self, container_id: &str) -> Result<()>;
}
