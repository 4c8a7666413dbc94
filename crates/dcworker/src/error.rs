// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dcworker.

use thiserror::Error;

/// Worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Master call could not be completed.
    #[error("Master error: {0}")]
    Master(#[from] dcworker_master::MasterError),

    /// Container runtime or subprocess failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// Dataset table operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Dataset table migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Presigned transfer failed at the HTTP layer.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task config from poll is missing a required field or is invalid.
    #[error("Malformed task config: {0}")]
    MalformedTaskConfig(String),

    /// Registration was rejected.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Enrollment was rejected.
    #[error("Enrollment failed: {0}")]
    Enrollment(String),

    /// The worker has no session token.
    #[error("Worker is not enrolled")]
    NotEnrolled,

    /// A stage that needs a task ran without one.
    #[error("No task is assigned to the worker")]
    NoTask,

    /// Code or dataset fetch failed.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Environment preparation failed.
    #[error("Prepare failed: {0}")]
    Prepare(String),

    /// Archive, download or upload failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Discriminant of [`Error`] for callers that branch on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    Config,
    Master,
    Runner,
    Database,
    Io,
    Json,
    MalformedTaskConfig,
    Registration,
    Enrollment,
    NotEnrolled,
    NoTask,
    Fetch,
    Prepare,
    Transfer,
}

impl Error {
    /// Class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Master(_) => ErrorKind::Master,
            Error::Runner(_) => ErrorKind::Runner,
            Error::Database(_) | Error::Migrate(_) => ErrorKind::Database,
            Error::Http(_) | Error::Transfer(_) => ErrorKind::Transfer,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
            Error::MalformedTaskConfig(_) => ErrorKind::MalformedTaskConfig,
            Error::Registration(_) => ErrorKind::Registration,
            Error::Enrollment(_) => ErrorKind::Enrollment,
            Error::NotEnrolled => ErrorKind::NotEnrolled,
            Error::NoTask => ErrorKind::NoTask,
            Error::Fetch(_) => ErrorKind::Fetch,
            Error::Prepare(_) => ErrorKind::Prepare,
        }
    }
}

/// Result type using the worker Error.
pub type Result<T> = std::result::Result<T, Error>;
