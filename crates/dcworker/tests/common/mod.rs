// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dcworker integration tests.
//!
//! Provides a scripted master, a mock container runtime, an in-memory
//! dataset table and a local HTTP server standing in for presigned storage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};

use dcworker::known_datasets::KnownDatasetSource;
use dcworker::runner::MockContainerRuntime;
use dcworker::{PollOutcome, SqliteDatasetRegistry, Worker, WorkerConfig};
use dcworker_master::{Endpoint, MockMaster};

// ============================================================================
// Presigned storage stand-in
// ============================================================================

/// One multipart POST received by the file server.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    hits: HashMap<String, usize>,
    uploads: Vec<Upload>,
}

type Shared = Arc<Mutex<ServerState>>;

/// Serves `GET /files/{name}` and accepts `POST /upload`.
pub struct FileServer {
    pub addr: SocketAddr,
    state: Shared,
}

async fn serve_file(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
) -> Result<Vec<u8>, StatusCode> {
    let mut state = state.lock().unwrap();
    *state.hits.entry(name.clone()).or_default() += 1;
    state.files.get(&name).cloned().ok_or(StatusCode::NOT_FOUND)
}

async fn accept_upload(State(state): State<Shared>, mut multipart: Multipart) -> StatusCode {
    let mut upload = Upload::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            upload.file_name = field.file_name().map(String::from);
            upload.bytes = field.bytes().await.unwrap().to_vec();
        } else {
            upload.fields.insert(name, field.text().await.unwrap());
        }
    }
    state.lock().unwrap().uploads.push(upload);
    StatusCode::NO_CONTENT
}

impl FileServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .route("/upload", post(accept_upload))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn add(&self, name: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), bytes);
    }

    /// Base URL under which files are served.
    pub fn files_base(&self) -> String {
        format!("http://{}/files", self.addr)
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.files_base(), name)
    }

    pub fn upload_url(&self) -> String {
        format!("http://{}/upload", self.addr)
    }

    pub fn hits(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.lock().unwrap().uploads.clone()
    }
}

/// Build a gzip tarball whose entries are `files` at the archive root.
pub fn tar_gz_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let source = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = source.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    let archive = out.path().join("bundle.tar.gz");
    let status = std::process::Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(source.path())
        .arg(".")
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::read(archive).unwrap()
}

/// Unpack a gzip tarball into a fresh directory.
pub fn untar(bytes: &[u8]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("in.tar.gz");
    std::fs::write(&archive, bytes).unwrap();
    let status = std::process::Command::new("tar")
        .arg("-xzf")
        .arg(&archive)
        .arg("-C")
        .arg(dir.path())
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::remove_file(archive).unwrap();
    dir
}

// ============================================================================
// Known datasets
// ============================================================================

/// Known-dataset source that writes a marker file and counts downloads.
#[derive(Default)]
pub struct CountingDatasetSource {
    pub downloads: Mutex<Vec<String>>,
    pub fail: bool,
}

impl CountingDatasetSource {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl KnownDatasetSource for CountingDatasetSource {
    async fn download(&self, dataset_name: &str, destination: &Path) -> dcworker::Result<()> {
        self.downloads.lock().unwrap().push(dataset_name.to_string());
        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::write(destination.join("part-0"), dataset_name).await?;
        if self.fail {
            return Err(dcworker::Error::Fetch(format!(
                "catalog has no '{}'",
                dataset_name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Worker harness
// ============================================================================

/// Shared fixtures for workers living on one simulated machine.
pub struct Harness {
    pub master: Arc<MockMaster>,
    pub runtime: MockContainerRuntime,
    pub registry: Arc<SqliteDatasetRegistry>,
    pub known: Arc<CountingDatasetSource>,
    pub data_dir: PathBuf,
    root: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_known(CountingDatasetSource::default()).await
    }

    pub async fn with_known(known: CountingDatasetSource) -> Self {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("datasets");
        std::fs::create_dir_all(&data_dir).unwrap();
        Self {
            master: Arc::new(MockMaster::new()),
            runtime: MockContainerRuntime::new(),
            registry: Arc::new(SqliteDatasetRegistry::in_memory().await.unwrap()),
            known: Arc::new(known),
            data_dir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Config for a worker with its own working directory.
    pub fn config(&self, name: &str) -> WorkerConfig {
        let mut config = WorkerConfig::new(
            "http://master.test",
            self.root.path().join(format!("work-{}", name)),
            &self.data_dir,
        );
        config.worker_uuid = Some(format!("worker-{}", name));
        config.passcode = Some("passcode".to_string());
        config.worker_info = "test machine".to_string();
        config.poll_interval = Duration::from_millis(10);
        config.dataset_wait = Duration::from_millis(10);
        config.dataset_wait_attempts = 3;
        config.log_stream_interval = Duration::from_millis(10);
        config
    }

    pub fn build(&self, config: WorkerConfig) -> Worker {
        Worker::builder(config, self.registry.clone())
            .master(self.master.clone())
            .runtime(Arc::new(self.runtime.clone()))
            .known_datasets(self.known.clone())
            .build()
            .unwrap()
    }

    pub fn worker(&self, name: &str) -> Worker {
        self.build(self.config(name))
    }

    pub async fn enrolled(&self, name: &str) -> Worker {
        let mut worker = self.worker(name);
        worker.enroll().await.unwrap();
        worker
    }

    /// Hand `config` to the worker through a poll.
    pub async fn assign(&self, worker: &mut Worker, config: Value) {
        self.master
            .push(Endpoint::Poll, 200, json!({"config": config.to_string()}));
        assert_eq!(worker.poll().await, PollOutcome::TaskReady);
    }
}

/// Minimal valid task config with no downloads.
pub fn task_config(task_uuid: &str) -> Value {
    json!({
        "task_uuid": task_uuid,
        "job_uuid": "job-1",
        "task_role": "worker",
        "task_index": 0,
        "cluster_spec": {"worker": ["10.0.0.1:2222", "10.0.0.2:2222"], "ps": ["10.0.0.3:2222"]},
        "command": ["python", "train.py", "--epochs", "3"],
        "container_image": "dc/tf:1.14",
        "download_info": {"code": []},
        "keep_alive_interval": 0
    })
}

/// Keep-alive answer telling the worker to go on.
pub fn continue_body() -> Value {
    json!({"result": "continue"})
}

/// Stop answer carrying a presigned upload target.
pub fn stop_body(upload_url: &str) -> Value {
    json!({
        "result": "stop",
        "task_data": {"upload_urls": {"output": {
            "url": upload_url,
            "fields": {"key": "results/${filename}", "policy": "p0"}
        }}}
    })
}
