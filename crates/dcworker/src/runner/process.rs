// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plain subprocesses used on provisioned machines.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::info;

use super::traits::{Result, RunnerError};

/// Run a command to completion, logging each stdout and stderr line under
/// the given stage.
pub async fn run_streaming(mut command: Command, stage: &'static str) -> Result<ExitStatus> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command
        .spawn()
        .map_err(|e| RunnerError::SpawnFailed(format!("{}: {}", program, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (status, _, _) = tokio::join!(
        child.wait(),
        forward_lines(stdout, stage, "stdout"),
        forward_lines(stderr, stage, "stderr"),
    );
    Ok(status?)
}

async fn forward_lines<R>(reader: Option<R>, stage: &'static str, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(stage = stage, stream = stream, "{}", line);
    }
}

/// Spawn a long-running task process. Killed if the handle is dropped.
pub fn spawn_process(
    program: &str,
    args: &[&str],
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<Child> {
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RunnerError::SpawnFailed(format!("{}: {}", program, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_streaming_reports_exit_status() {
        let mut ok = Command::new("sh");
        ok.args(["-c", "echo one; echo two 1>&2"]);
        assert!(run_streaming(ok, "pre_run").await.unwrap().success());

        let mut failing = Command::new("sh");
        failing.args(["-c", "exit 3"]);
        assert_eq!(
            run_streaming(failing, "pre_run").await.unwrap().code(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = spawn_process("/nonexistent/python", &[], dir.path(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_spawn_passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("TASK_UUID".to_string(), "t-1".to_string());

        let mut child = spawn_process(
            "sh",
            &["-c", "printf \"$TASK_UUID\" > out.txt"],
            dir.path(),
            &env,
        )
        .unwrap();
        assert!(child.wait().await.unwrap().success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "t-1"
        );
    }
}
