// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dcworker - training worker agent
//!
//! A worker enrolls with the master server, polls for training tasks, and
//! for each task downloads code and datasets, prepares the environment,
//! starts the task (in a container or as a plain process), keeps the master
//! informed while it runs, uploads the results and cleans up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Master server                           │
//! └──────────────────────────────────────────────────────────────────┘
//!        ▲ register / enroll / poll / task / log  (dcworker-master)
//!        │
//! ┌──────┴───────────────────────────────────────────────────────────┐
//! │                         dcworker (Worker)                         │
//! │  ┌─────────┐ ┌────────┐ ┌──────────┐ ┌────────┐ ┌──────────────┐ │
//! │  │ Enroll  │ │ Fetch  │ │ Pre-run  │ │  Run   │ │ Signal loop  │ │
//! │  │  Poll   │ │        │ │          │ │        │ │ Post-run     │ │
//! │  └─────────┘ └───┬────┘ └────┬─────┘ └───┬────┘ └──────────────┘ │
//! └──────────────────┼───────────┼───────────┼───────────────────────┘
//!                    │           │           │
//!          ┌─────────▼──────┐    │   ┌───────▼────────────────────┐
//!          │ Dataset cache  │    └──►│ ContainerRuntime / process │
//!          │ + SQLite refs  │        └────────────────────────────┘
//!          └────────────────┘
//! ```
//!
//! # Machine types
//!
//! | Type | Task runs as | Datasets |
//! |------|--------------|----------|
//! | `standard` | detached container with bind mounts | shared cache, ref-counted |
//! | `provisioned` | `python /runtime/worker_run.py` subprocess | downloaded per task |

pub mod config;
pub mod context;
pub mod dataset_registry;
pub mod error;
pub mod identity;
pub mod known_datasets;
pub mod layout;
pub mod log_stream;
pub mod logging;
pub mod retry;
pub mod runner;
pub mod task;
pub mod transfer;
pub mod worker;

pub use config::{ConfigError, MachineType, WorkerConfig, WorkerType};
pub use dataset_registry::{DatasetReference, DatasetRegistry, SqliteDatasetRegistry};
pub use error::{Error, ErrorKind, Result};
pub use identity::{StoredIdentity, WorkerIdentity};
pub use retry::RetryBudget;
pub use task::{TaskDescriptor, TaskRole};
pub use worker::{PollOutcome, SignalReport, SignalState, Worker, WorkerBuilder};
