// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dcworker-master.

use thiserror::Error;

/// Result type using MasterError.
pub type Result<T> = std::result::Result<T, MasterError>;

/// Errors raised before a status code could be obtained from the master.
///
/// Non-2xx statuses are not errors at this layer; they are returned inside
/// [`crate::MasterResponse`] so callers can branch on them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MasterError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP request could not be sent or its body could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure without an underlying HTTP error (used by the mock).
    #[error("transport error: {0}")]
    Transport(String),
}
