// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker identity.
//!
//! [`StoredIdentity`] is the durable half written by `dcworker register`.
//! [`WorkerIdentity`] is the session built by a successful enroll and dropped
//! when the master answers a poll with 401.

use std::path::Path;

use dcworker_master::AuthToken;
use serde::{Deserialize, Serialize};

use crate::config::{MachineType, WorkerType};
use crate::error::Result;

/// Session identity of an enrolled worker.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub worker_uuid: String,
    pub auth_token: AuthToken,
    pub passcode: String,
    pub worker_type: WorkerType,
    pub resource_id: i64,
    pub machine_type: MachineType,
}

/// Registration result persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub worker_uuid: String,
    pub passcode: String,
}

impl StoredIdentity {
    /// Read an identity file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Write the identity file, creating parent directories.
    ///
    /// On unix the file is readable by the owner only.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/identity.json");
        let identity = StoredIdentity {
            worker_uuid: "w-1".to_string(),
            passcode: "p-1".to_string(),
        };

        identity.save(&path).await.unwrap();
        let loaded = StoredIdentity::load(&path).await.unwrap();
        assert_eq!(loaded, identity);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoredIdentity::load(dir.path().join("none.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
