// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner module - task execution backends.
//!
//! Standard machines run tasks in containers through a [`ContainerRuntime`];
//! provisioned machines spawn the entry point as a plain subprocess.

pub mod docker;
pub mod mock;
pub mod process;
mod traits;

pub use docker::DockerCli;
pub use mock::MockContainerRuntime;
pub use traits::*;
