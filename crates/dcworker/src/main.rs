// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dcworker - training worker agent
//!
//! ```text
//! dcworker register [--task-uuid <uuid>]   # create credentials
//! dcworker run [--workdir <dir>] ...       # enroll and run tasks
//! ```
//!
//! Every `run` option can also be given as a `DCWORKER_*` environment
//! variable; flags win. A `.env` file is loaded when present.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dcworker::logging::{self, LogFormat};
use dcworker::{SqliteDatasetRegistry, StoredIdentity, Worker, WorkerConfig};
use dcworker_master::{HttpMasterClient, MasterConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dcworker")]
#[command(about = "Worker agent for distributed training tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new worker with the master and save its credentials
    Register {
        /// Master server URL
        #[arg(long, env = "DCWORKER_MASTER_ENDPOINT")]
        master_endpoint: String,

        /// Bind the new worker to this task
        #[arg(long)]
        task_uuid: Option<String>,

        /// Where to write the credentials
        #[arg(long, env = "DCWORKER_IDENTITY_FILE", default_value = ".dcworker/identity.json")]
        identity_file: PathBuf,
    },

    /// Enroll and run tasks until interrupted
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Master server URL
    #[arg(long)]
    master_endpoint: Option<String>,

    /// Working directory for the current task (wiped on enroll)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Shared dataset cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// `standard` or `provisioned`
    #[arg(long)]
    machine_type: Option<String>,

    /// `cpu` or `gpu`
    #[arg(long)]
    worker_type: Option<String>,

    /// Port reported to the master
    #[arg(long)]
    port: Option<u16>,

    /// Credentials file written by `register`
    #[arg(long)]
    identity_file: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        let path = |p: &PathBuf| p.display().to_string();
        if let Some(v) = &self.master_endpoint {
            map.insert("DCWORKER_MASTER_ENDPOINT", v.clone());
        }
        if let Some(v) = &self.workdir {
            map.insert("DCWORKER_WORKDIR", path(v));
        }
        if let Some(v) = &self.data_dir {
            map.insert("DCWORKER_DATA_DIR", path(v));
        }
        if let Some(v) = &self.machine_type {
            map.insert("DCWORKER_MACHINE_TYPE", v.clone());
        }
        if let Some(v) = &self.worker_type {
            map.insert("DCWORKER_WORKER_TYPE", v.clone());
        }
        if let Some(v) = self.port {
            map.insert("DCWORKER_PORT", v.to_string());
        }
        if let Some(v) = &self.identity_file {
            map.insert("DCWORKER_IDENTITY_FILE", path(v));
        }
        map
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads env-backed arguments
    let dotenv = dotenvy::dotenv();

    if let Err(e) = logging::init(LogFormat::from_env()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    match Cli::parse().command {
        Command::Register {
            master_endpoint,
            task_uuid,
            identity_file,
        } => register(master_endpoint, task_uuid, identity_file).await,
        Command::Run(args) => run(args).await,
    }
}

async fn register(
    master_endpoint: String,
    task_uuid: Option<String>,
    identity_file: PathBuf,
) -> anyhow::Result<()> {
    let master = HttpMasterClient::new(MasterConfig::new(master_endpoint)?)?;
    let (worker_uuid, passcode) = Worker::register(&master, task_uuid.as_deref()).await?;

    StoredIdentity {
        worker_uuid: worker_uuid.clone(),
        passcode,
    }
    .save(&identity_file)
    .await
    .with_context(|| format!("failed to write {}", identity_file.display()))?;

    info!(
        stage = "register",
        worker_uuid = %worker_uuid,
        identity_file = %identity_file.display(),
        "Credentials saved"
    );
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let overrides = args.overrides();
    let mut config = WorkerConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;

    if !config.has_credentials() {
        let stored = StoredIdentity::load(&config.identity_file)
            .await
            .with_context(|| {
                format!(
                    "no DCWORKER_WORKER_UUID/DCWORKER_PASSCODE and no readable identity file at {}; run `dcworker register` first",
                    config.identity_file.display()
                )
            })?;
        config.worker_uuid.get_or_insert(stored.worker_uuid);
        config.passcode.get_or_insert(stored.passcode);
    }

    info!(
        master = %config.master_endpoint,
        workdir = %config.workdir.display(),
        data_dir = %config.data_dir.display(),
        machine_type = %config.machine_type,
        worker_type = %config.worker_type,
        "Starting dcworker"
    );

    let registry = Arc::new(SqliteDatasetRegistry::from_path(&config.dataset_db).await?);
    info!(path = %config.dataset_db.display(), "Dataset table ready");

    let mut worker = Worker::builder(config, registry).build()?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            on_signal.cancel();
        }
    });

    worker.run_until(shutdown).await?;
    Ok(())
}
