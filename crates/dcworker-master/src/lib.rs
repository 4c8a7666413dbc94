// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dcworker master client
//!
//! Typed client for the master-server HTTP API that training workers talk to.
//!
//! | Call | Method | Path |
//! |------|--------|------|
//! | register | POST | `/api/v1/worker/register/` |
//! | enroll | POST | `/api/v1/worker/enroll/` |
//! | poll | POST | `/api/v1/worker/poll/` |
//! | task action | POST | `/api/v1/worker/task/` |
//! | tensorboard | PUT | `/api/v1/worker/task/{uuid}/` |
//! | user log | POST | `/api/v1/worker/task/{uuid}/log/` |
//!
//! Status codes are not mapped to errors here: a 202 from poll, a 401 after
//! token expiry and a 503 during a keep-alive all mean different things to the
//! worker stage that made the call, so [`MasterApi`] returns them as
//! [`MasterResponse`] values and only fails on transport problems.
//!
//! # Example
//!
//! ```no_run
//! use dcworker_master::{HttpMasterClient, MasterApi, MasterConfig, RegisterRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpMasterClient::new(MasterConfig::new("http://127.0.0.1:8000")?)?;
//! let response = client.register(&RegisterRequest::default()).await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod client;
mod config;
mod error;
pub mod mock;
mod types;

pub use client::{HttpMasterClient, MasterApi};
pub use config::MasterConfig;
pub use error::{MasterError, Result};
pub use mock::{Endpoint, MockMaster, RecordedCall};
pub use types::{
    AuthToken, ENROLL_PATH, EnrollRequest, LogBatch, MasterResponse, POLL_PATH, PollRequest,
    PresignedPost, REGISTER_PATH, RegisterRequest, TASK_PATH, TaskAction, TaskActionRequest,
    TensorboardRequest, task_detail_path, task_log_path,
};
