// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Liveness monitoring and status reporting while the task runs.
//!
//! While the task is alive the worker sends `progress` every
//! `keep_alive_interval`. The master answers `continue` to keep going or
//! anything else to stop the task. 5xx answers are retried against a
//! [`RetryBudget`]; other failures abort the loop.
//!
//! Once the task exits (or writes the failure marker) it is reported as
//! `finished` or `failed`, again retrying 5xx answers with the same budget.

use std::process::Stdio;

use dcworker_master::{AuthToken, MasterResponse, TaskAction, TaskActionRequest};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::Worker;
use crate::context::Liveness;
use crate::error::Result;
use crate::retry::RetryBudget;

/// How the signal loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// The master answered the keep-alive with something other than `continue`.
    StoppedByServer,
    /// The task exited without the failure marker.
    FinishedGraceful,
    /// The task crashed or wrote the failure marker.
    FailedUngraceful,
    /// Transport error or a non-retryable status from the master.
    AbortedByClientError,
    /// Too many 5xx answers to the keep-alive.
    AbortedByServerErrorRetryExhausted,
}

/// Final state of the loop and what was left of the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalReport {
    pub state: SignalState,
    pub retry_budget: RetryBudget,
}

enum Step {
    Continue(RetryBudget),
    Done(SignalState, RetryBudget),
}

impl Worker {
    /// Supervise the running task until it ends or the master stops it.
    pub async fn signal(&mut self) -> Result<SignalReport> {
        let token = self.require_identity()?.auth_token.clone();
        let task = self.require_task()?;
        let task_uuid = task.task_uuid.clone();
        let keep_alive = task.keep_alive_interval;

        let mut budget = RetryBudget::new(self.config.retry_budget);
        loop {
            let liveness = match self.context.as_mut() {
                Some(context) => context.monitor().await,
                None => Liveness {
                    alive: false,
                    graceful: false,
                },
            };

            let step = if liveness.alive && liveness.graceful {
                self.keep_alive(&token, &task_uuid, budget).await
            } else {
                self.report_exit(&token, &task_uuid, liveness.graceful, budget)
                    .await
            };

            match step {
                Step::Continue(remaining) => {
                    budget = remaining;
                    tokio::time::sleep(keep_alive).await;
                }
                Step::Done(state, remaining) => {
                    info!(
                        stage = "signal",
                        task_uuid = %task_uuid,
                        state = ?state,
                        retries_left = remaining.remaining(),
                        "Signal loop finished"
                    );
                    return Ok(SignalReport {
                        state,
                        retry_budget: remaining,
                    });
                }
            }
        }
    }

    async fn keep_alive(&mut self, token: &AuthToken, task_uuid: &str, budget: RetryBudget) -> Step {
        let request = TaskActionRequest {
            task_uuid: task_uuid.to_string(),
            action: TaskAction::Progress,
        };

        let response = match self.master.task_action(token, &request).await {
            Ok(response) => response,
            Err(e) => {
                error!(stage = "signal", error = %e, "Keep-alive failed");
                self.terminate_context().await;
                return Step::Done(SignalState::AbortedByClientError, budget);
            }
        };

        if response.status == 200 {
            if response.task_result() == Some("continue") {
                debug!(stage = "signal", task_uuid, "Master says continue");
                if response.wants_tensorboard() {
                    self.start_tensorboard(token, task_uuid).await;
                }
                return Step::Continue(budget);
            }

            match response.task_result() {
                Some("stop") => {
                    info!(stage = "signal", task_uuid, "Master stopped the task");
                    self.mark_finished();
                }
                other => warn!(
                    stage = "signal",
                    task_uuid,
                    result = ?other,
                    "Unexpected keep-alive result, stopping the task"
                ),
            }
            self.terminate_context().await;
            self.capture_upload_urls(&response, true);
            return Step::Done(SignalState::StoppedByServer, budget);
        }

        if response.is_server_error() {
            return match budget.consume() {
                Some(remaining) => {
                    warn!(
                        stage = "signal",
                        status = response.status,
                        retries_left = remaining.remaining(),
                        "Master error on keep-alive, retrying"
                    );
                    Step::Continue(remaining)
                }
                None => {
                    error!(
                        stage = "signal",
                        status = response.status,
                        "Master kept failing, giving up on the task"
                    );
                    self.terminate_context().await;
                    Step::Done(SignalState::AbortedByServerErrorRetryExhausted, budget)
                }
            };
        }

        error!(
            stage = "signal",
            status = response.status,
            error = %response.error_message(),
            "Keep-alive rejected"
        );
        self.terminate_context().await;
        Step::Done(SignalState::AbortedByClientError, budget)
    }

    async fn report_exit(
        &mut self,
        token: &AuthToken,
        task_uuid: &str,
        graceful: bool,
        mut budget: RetryBudget,
    ) -> Step {
        self.terminate_context().await;

        let state = if graceful {
            SignalState::FinishedGraceful
        } else {
            SignalState::FailedUngraceful
        };
        let (signal_finish, keep_alive) = match &self.task {
            Some(task) => (task.signal_finish, task.keep_alive_interval),
            None => (true, std::time::Duration::ZERO),
        };

        let action = match (graceful, signal_finish) {
            (false, _) => TaskAction::Failed,
            (true, true) => TaskAction::Finished,
            (true, false) => {
                info!(stage = "signal", task_uuid, "Task exited, no finish signal required");
                self.mark_finished();
                return Step::Done(state, budget);
            }
        };

        let request = TaskActionRequest {
            task_uuid: task_uuid.to_string(),
            action,
        };
        loop {
            match self.master.task_action(token, &request).await {
                Err(e) => {
                    error!(stage = "signal", action = %action, error = %e, "Failed to report task exit");
                    break;
                }
                Ok(response) if response.is_server_error() => match budget.consume() {
                    Some(remaining) => {
                        budget = remaining;
                        warn!(
                            stage = "signal",
                            action = %action,
                            status = response.status,
                            retries_left = budget.remaining(),
                            "Master error on exit report, retrying"
                        );
                        tokio::time::sleep(keep_alive).await;
                    }
                    None => {
                        error!(
                            stage = "signal",
                            action = %action,
                            status = response.status,
                            "Master kept failing, exit report lost"
                        );
                        break;
                    }
                },
                Ok(response) if response.status < 300 => {
                    info!(stage = "signal", task_uuid, action = %action, "Task exit reported");
                    self.mark_finished();
                    self.capture_upload_urls(&response, false);
                    break;
                }
                Ok(response) => {
                    warn!(
                        stage = "signal",
                        action = %action,
                        status = response.status,
                        error = %response.error_message(),
                        "Exit report rejected"
                    );
                    break;
                }
            }
        }

        Step::Done(state, budget)
    }

    async fn terminate_context(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.terminate().await;
        }
    }

    fn mark_finished(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.finished = true;
        }
    }

    fn capture_upload_urls(&mut self, response: &MasterResponse, expected: bool) {
        match response.output_upload() {
            Ok(post) => {
                if let Some(task) = self.task.as_mut() {
                    task.output_upload_urls = Some(post);
                }
            }
            Err(reason) if expected => {
                warn!(stage = "signal", reason = %reason, "No upload target in stop response");
            }
            Err(reason) => debug!(stage = "signal", reason = %reason, "No upload target in response"),
        }
    }

    /// Start tensorboard against the output directory and tell the master.
    async fn start_tensorboard(&mut self, token: &AuthToken, task_uuid: &str) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if task.tensorboard.is_some() {
            return;
        }

        let spawned = Command::new(&self.config.tensorboard_bin)
            .arg(format!("--logdir={}", self.layout.output_dir().display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => task.tensorboard = Some(child),
            Err(e) => {
                warn!(stage = "tensorboard", error = %e, "Failed to start tensorboard");
                return;
            }
        }
        info!(stage = "tensorboard", task_uuid, "Tensorboard started");

        match self.master.tensorboard_created(token, task_uuid).await {
            Ok(response) if response.is_success() => debug!(
                stage = "tensorboard",
                url = response.str_field("tensorboard_url").unwrap_or("<none>"),
                "Tensorboard registered"
            ),
            Ok(response) => warn!(
                stage = "tensorboard",
                status = response.status,
                error = %response.error_message(),
                "Master rejected tensorboard update"
            ),
            Err(e) => warn!(stage = "tensorboard", error = %e, "Failed to send tensorboard update"),
        }
    }
}
