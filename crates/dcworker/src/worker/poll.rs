// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task polling.

use dcworker_master::PollRequest;
use tracing::{debug, error, info, warn};

use super::Worker;
use crate::task::TaskDescriptor;

/// What a poll produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The master has nothing for us (202).
    NoTask,
    /// A task was assigned and parsed.
    TaskReady,
    /// The session is gone; enroll again.
    Reenroll,
    /// A task was assigned but its config could not be used; clean it up.
    MalformedTask,
    /// Transport error or unexpected status; try again later.
    Failed,
}

impl PollOutcome {
    /// `(ok, task_ready, needs_reenroll, needs_cleanup)`
    pub fn flags(&self) -> (bool, bool, bool, bool) {
        match self {
            PollOutcome::NoTask => (true, false, false, false),
            PollOutcome::TaskReady => (true, true, false, false),
            PollOutcome::Reenroll => (false, false, true, false),
            PollOutcome::MalformedTask => (false, false, false, true),
            PollOutcome::Failed => (false, false, false, false),
        }
    }
}

impl Worker {
    /// Ask the master for a task.
    pub async fn poll(&mut self) -> PollOutcome {
        self.reset_task().await;

        let Some(identity) = &self.identity else {
            warn!(stage = "poll", "Not enrolled");
            return PollOutcome::Reenroll;
        };

        let request = PollRequest {
            port: self.config.port,
        };
        let response = match self.master.poll(&identity.auth_token, &request).await {
            Ok(response) => response,
            Err(e) => {
                error!(stage = "poll", error = %e, "Poll failed");
                return PollOutcome::Failed;
            }
        };

        match response.status {
            202 => {
                debug!(stage = "poll", "No task assigned");
                PollOutcome::NoTask
            }
            200 => match TaskDescriptor::from_poll_body(&response.body) {
                Ok(task) => {
                    info!(
                        stage = "poll",
                        task_uuid = %task.task_uuid,
                        job_uuid = %task.job_uuid,
                        task_role = task.task_role.as_str(),
                        task_index = task.task_index,
                        "Task assigned"
                    );
                    self.task_uuid = Some(task.task_uuid.clone());
                    self.task = Some(task);
                    PollOutcome::TaskReady
                }
                Err(e) => {
                    self.task_uuid = TaskDescriptor::recover_task_uuid(&response.body);
                    error!(
                        stage = "poll",
                        task_uuid = ?self.task_uuid,
                        error = %e,
                        "Task config is unusable"
                    );
                    PollOutcome::MalformedTask
                }
            },
            401 => {
                warn!(stage = "poll", "Session token rejected, re-enrolling");
                self.identity = None;
                PollOutcome::Reenroll
            }
            status => {
                error!(
                    stage = "poll",
                    status,
                    error = %response.error_message(),
                    "Unexpected poll response"
                );
                PollOutcome::Failed
            }
        }
    }

    /// Sleep until the next poll.
    pub async fn poll_wait(&self) {
        tokio::time::sleep(self.config.poll_interval).await;
    }
}
