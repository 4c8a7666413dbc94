// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Main worker loop.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{PollOutcome, Worker};
use crate::error::Result;

impl Worker {
    /// Enroll, then poll and run tasks until `shutdown` is cancelled.
    ///
    /// Only the first enroll is fatal. Shutdown is checked between stages
    /// and while waiting; a task in flight is terminated and cleaned up.
    pub async fn run_until(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.enroll().await?;

        while !shutdown.is_cancelled() {
            match self.poll().await {
                PollOutcome::TaskReady => {
                    self.run_task(&shutdown).await;
                }
                PollOutcome::MalformedTask => {
                    self.task_cleanup().await;
                    if !self.wait_or_shutdown(&shutdown).await {
                        break;
                    }
                }
                PollOutcome::Reenroll => {
                    if let Err(e) = self.enroll().await {
                        error!(stage = "enroll", error = %e, "Re-enrollment failed");
                        if !self.wait_or_shutdown(&shutdown).await {
                            break;
                        }
                    }
                }
                PollOutcome::NoTask | PollOutcome::Failed => {
                    if !self.wait_or_shutdown(&shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Run the assigned task through every stage, then clean up.
    ///
    /// Returns whether the signal loop ran to an end.
    pub async fn run_task(&mut self, shutdown: &CancellationToken) -> bool {
        let completed = self.execute_task(shutdown).await;
        self.task_cleanup().await;
        completed
    }

    async fn execute_task(&mut self, shutdown: &CancellationToken) -> bool {
        if let Err(e) = self.fetch(true, true).await {
            error!(stage = "fetch", error = %e, "Fetch failed");
            return false;
        }
        if shutdown.is_cancelled() {
            return false;
        }

        if let Err(e) = self.pre_run().await {
            error!(stage = "pre_run", error = %e, "Environment preparation failed");
            return false;
        }
        if shutdown.is_cancelled() {
            return false;
        }

        if let Err(e) = self.run(None).await {
            error!(stage = "run", error = %e, "Failed to start task");
            return false;
        }

        let report = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                warn!(stage = "signal", "Shutdown requested, abandoning task");
                return false;
            }

            report = self.signal() => report,
        };

        match report {
            Ok(report) => {
                info!(stage = "signal", state = ?report.state, "Task ended");
                self.post_run(None).await;
                true
            }
            Err(e) => {
                error!(stage = "signal", error = %e, "Signal loop failed");
                false
            }
        }
    }

    /// Sleep one poll interval. False if shutdown came first.
    async fn wait_or_shutdown(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => false,
            _ = self.poll_wait() => true,
        }
    }
}
