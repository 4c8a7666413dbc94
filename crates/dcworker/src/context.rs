// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution context of the running task.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::layout::FAILURE_MARKER;
use crate::log_stream::LogStreamer;
use crate::runner::ContainerRuntime;

/// How the task is being executed.
pub enum ExecutionHandle {
    /// Entry point spawned directly on a provisioned host.
    Process(Child),
    /// Detached container on a standard host.
    Container {
        id: String,
        runtime: Arc<dyn ContainerRuntime>,
    },
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionHandle::Process(child) => f
                .debug_struct("Process")
                .field("pid", &child.id())
                .finish(),
            ExecutionHandle::Container { id, runtime } => f
                .debug_struct("Container")
                .field("id", id)
                .field("runtime", &runtime.runtime_type())
                .finish(),
        }
    }
}

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub alive: bool,
    /// False once the entry point wrote the failure marker or the runtime
    /// lost track of the task.
    pub graceful: bool,
}

/// The running task plus the log streamer attached to it.
#[derive(Debug)]
pub struct TaskContext {
    handle: ExecutionHandle,
    failure_marker: PathBuf,
    log_streamer: Option<LogStreamer>,
    is_alive: bool,
    /// The container has been deleted from the runtime.
    released: bool,
}

impl TaskContext {
    pub fn new(handle: ExecutionHandle, log_dir: &Path) -> Self {
        Self {
            handle,
            failure_marker: log_dir.join(FAILURE_MARKER),
            log_streamer: None,
            is_alive: true,
            released: false,
        }
    }

    pub fn attach_log_streamer(&mut self, streamer: LogStreamer) {
        self.log_streamer = Some(streamer);
    }

    pub fn handle(&self) -> &ExecutionHandle {
        &self.handle
    }

    /// Alive as of the last check.
    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    /// Check whether the task still runs and whether it failed.
    pub async fn monitor(&mut self) -> Liveness {
        let mut lost = false;
        if self.is_alive {
            let alive = match &mut self.handle {
                ExecutionHandle::Process(child) => match child.try_wait() {
                    Ok(None) => true,
                    Ok(Some(status)) => {
                        debug!(stage = "signal", exit_code = ?status.code(), "Task process exited");
                        false
                    }
                    Err(e) => {
                        warn!(stage = "signal", error = %e, "Failed to poll task process");
                        lost = true;
                        false
                    }
                },
                ExecutionHandle::Container { id, runtime } => match runtime.status(id).await {
                    Ok(status) => status.is_alive(),
                    Err(e) => {
                        warn!(stage = "signal", container_id = %id, error = %e, "Failed to inspect task container");
                        lost = true;
                        false
                    }
                },
            };
            self.is_alive = alive;
        }

        Liveness {
            alive: self.is_alive,
            graceful: !lost && !self.failure_reported().await,
        }
    }

    async fn failure_reported(&self) -> bool {
        match tokio::fs::read_to_string(&self.failure_marker).await {
            Ok(content) => {
                error!(stage = "signal", failure = %content.trim(), "Task reported a failure");
                true
            }
            Err(_) => false,
        }
    }

    /// Stop the task if it still runs, delete its container and stop the
    /// log streamer.
    pub async fn terminate(&mut self) {
        if self.is_alive {
            match &mut self.handle {
                ExecutionHandle::Process(child) => {
                    if let Err(e) = child.kill().await {
                        warn!(stage = "signal", error = %e, "Failed to kill task process");
                    }
                }
                ExecutionHandle::Container { id, runtime } => {
                    if let Err(e) = runtime.kill(id).await {
                        warn!(stage = "signal", container_id = %id, error = %e, "Failed to kill task container");
                    }
                }
            }
            self.is_alive = false;
            info!(stage = "signal", "Task terminated");
        }

        if let ExecutionHandle::Container { id, runtime } = &self.handle {
            if !self.released {
                self.released = true;
                match runtime.remove(id).await {
                    Ok(()) => debug!(stage = "signal", container_id = %id, "Task container removed"),
                    Err(e) => {
                        warn!(stage = "signal", container_id = %id, error = %e, "Failed to remove task container")
                    }
                }
            }
        }

        if let Some(streamer) = self.log_streamer.take() {
            streamer.shutdown().await;
        }
    }
}
