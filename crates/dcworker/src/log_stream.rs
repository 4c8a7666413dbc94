// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervised forwarder for the task's user log.
//!
//! A tokio task tails `<log>/<task_uuid>.log` and posts new lines to the
//! master. It is owned by the [`crate::context::TaskContext`] and stopped
//! through a [`CancellationToken`]; on cancellation the remaining lines,
//! including an unterminated last line, are flushed before the task exits.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dcworker_master::{AuthToken, LogBatch, MasterApi};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines per POST.
pub const DEFAULT_MAX_BATCH: usize = 500;

/// What to tail and where to send it.
#[derive(Debug, Clone)]
pub struct LogStreamConfig {
    pub job_uuid: String,
    pub task_uuid: String,
    pub log_type: String,
    pub path: PathBuf,
    /// Delay between reads of the file.
    pub interval: Duration,
    pub max_batch: usize,
}

impl LogStreamConfig {
    /// Stream of the task's own log file.
    pub fn user_log(
        job_uuid: impl Into<String>,
        task_uuid: impl Into<String>,
        path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            job_uuid: job_uuid.into(),
            task_uuid: task_uuid.into(),
            log_type: "user".to_string(),
            path: path.into(),
            interval,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// Handle to a running log forwarder.
#[derive(Debug)]
pub struct LogStreamer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogStreamer {
    /// Start forwarding in the background.
    pub fn spawn(master: Arc<dyn MasterApi>, token: AuthToken, config: LogStreamConfig) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(forward(master, token, config, cancel.clone()));
        Self { cancel, handle }
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Flush what is left, stop the task and wait for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(stage = "log_stream", error = %e, "Log streamer task failed");
        }
    }
}

async fn forward(
    master: Arc<dyn MasterApi>,
    token: AuthToken,
    config: LogStreamConfig,
    cancel: CancellationToken,
) {
    debug!(
        stage = "log_stream",
        task_uuid = %config.task_uuid,
        path = %config.path.display(),
        "Log streamer started"
    );
    let mut tail = Tail::new(config.path.clone());

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let mut lines = match tail.read_lines().await {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(stage = "log_stream", error = %e, "Failed to read user log");
                        Vec::new()
                    }
                };
                lines.extend(tail.take_partial());
                send(master.as_ref(), &token, &config, lines).await;
                break;
            }

            _ = tokio::time::sleep(config.interval) => {
                match tail.read_lines().await {
                    Ok(lines) => send(master.as_ref(), &token, &config, lines).await,
                    Err(e) => warn!(stage = "log_stream", error = %e, "Failed to read user log"),
                }
            }
        }
    }

    info!(
        stage = "log_stream",
        task_uuid = %config.task_uuid,
        lines = tail.forwarded,
        "Log streamer stopped"
    );
}

async fn send(master: &dyn MasterApi, token: &AuthToken, config: &LogStreamConfig, lines: Vec<String>) {
    for chunk in lines.chunks(config.max_batch.max(1)) {
        let batch = LogBatch {
            job_uuid: config.job_uuid.clone(),
            task_uuid: config.task_uuid.clone(),
            log_type: config.log_type.clone(),
            lines: chunk.to_vec(),
        };
        match master.push_log(token, &batch).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!(
                stage = "log_stream",
                status = response.status,
                error = %response.error_message(),
                "Master rejected log batch"
            ),
            Err(e) => warn!(stage = "log_stream", error = %e, "Failed to send log batch"),
        }
    }
}

/// Incremental reader of a growing file.
struct Tail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    forwarded: usize,
}

impl Tail {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            partial: Vec::new(),
            forwarded: 0,
        }
    }

    /// Complete lines appended since the last call.
    async fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            // Truncated or replaced.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.take(len - self.offset).read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(decode(&line));
        }
        self.forwarded += lines.len();
        Ok(lines)
    }

    /// Unterminated trailing text, if any.
    fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode(&std::mem::take(&mut self.partial));
        self.forwarded += 1;
        Some(line)
    }
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcworker_master::{Endpoint, MockMaster};
    use tokio::io::AsyncWriteExt;

    fn forwarded_lines(master: &MockMaster) -> Vec<String> {
        master
            .calls_to(Endpoint::Log)
            .iter()
            .flat_map(|call| {
                call.body["lines"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| v.as_str().map(String::from))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_tail_splits_lines_and_handles_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let mut tail = Tail::new(path.clone());

        assert!(tail.read_lines().await.unwrap().is_empty());

        tokio::fs::write(&path, "one\ntwo\r\nthr").await.unwrap();
        assert_eq!(tail.read_lines().await.unwrap(), vec!["one", "two"]);

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"ee\n").await.unwrap();
        file.flush().await.unwrap();
        assert_eq!(tail.read_lines().await.unwrap(), vec!["three"]);

        tokio::fs::write(&path, "new\n").await.unwrap();
        assert_eq!(tail.read_lines().await.unwrap(), vec!["new"]);
        assert_eq!(tail.take_partial(), None);
    }

    #[tokio::test]
    async fn test_streamer_forwards_and_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-1.log");
        let master = Arc::new(MockMaster::new());

        let streamer = LogStreamer::spawn(
            master.clone(),
            AuthToken::new("tok"),
            LogStreamConfig::user_log("job-1", "task-1", &path, Duration::from_millis(10)),
        );

        tokio::fs::write(&path, "epoch 1\nepoch 2\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(forwarded_lines(&master), vec!["epoch 1", "epoch 2"]);

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"done").await.unwrap();
        file.flush().await.unwrap();

        streamer.shutdown().await;
        assert_eq!(forwarded_lines(&master), vec!["epoch 1", "epoch 2", "done"]);

        let call = &master.calls_to(Endpoint::Log)[0];
        assert_eq!(call.body["job_uuid"], "job-1");
        assert_eq!(call.body["log_type"], "user");
        assert_eq!(call.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_batches_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-2.log");
        tokio::fs::write(&path, "a\nb\nc\nd\ne\n").await.unwrap();
        let master = Arc::new(MockMaster::new());

        let mut config =
            LogStreamConfig::user_log("job", "task-2", &path, Duration::from_secs(3600));
        config.max_batch = 2;
        LogStreamer::spawn(master.clone(), AuthToken::new("tok"), config)
            .shutdown()
            .await;

        assert_eq!(master.call_count(Endpoint::Log), 3);
        assert_eq!(forwarded_lines(&master), vec!["a", "b", "c", "d", "e"]);
    }
}
