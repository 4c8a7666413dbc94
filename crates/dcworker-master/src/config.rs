// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the master client.

use std::time::Duration;

use crate::error::{MasterError, Result};

/// Configuration for [`crate::HttpMasterClient`].
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Base endpoint of the master server, e.g. `http://127.0.0.1:8000`.
    pub endpoint: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl MasterConfig {
    /// Create a configuration for the given endpoint with default timeouts.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let trimmed = endpoint.trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(MasterError::Config(format!(
                "master endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        Ok(Self {
            endpoint: trimmed.to_string(),
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Override the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Join an API path onto the endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = MasterConfig::new("http://master:8000/").unwrap();
        assert_eq!(
            config.url("/api/v1/worker/poll/"),
            "http://master:8000/api/v1/worker/poll/"
        );
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = MasterConfig::new("master:8000").unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn test_default_timeout() {
        let config = MasterConfig::new("https://master").unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        let config = config.with_request_timeout(Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
