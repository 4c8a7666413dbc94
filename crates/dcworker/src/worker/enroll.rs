// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration and enrollment.

use dcworker_master::{AuthToken, EnrollRequest, MasterApi, RegisterRequest};
use tracing::{error, info};

use super::Worker;
use crate::error::{Error, Result};
use crate::identity::WorkerIdentity;

impl Worker {
    /// Create a worker account on the master.
    ///
    /// Returns `(worker_uuid, passcode)`. Not retried.
    pub async fn register(
        master: &dyn MasterApi,
        task_uuid: Option<&str>,
    ) -> Result<(String, String)> {
        let request = RegisterRequest {
            task_uuid: task_uuid.map(String::from),
        };
        let response = master.register(&request).await?;

        if response.status != 200 {
            error!(
                stage = "register",
                status = response.status,
                error = %response.error_message(),
                "Registration rejected"
            );
            return Err(Error::Registration(format!(
                "master returned {}: {}",
                response.status,
                response.error_message()
            )));
        }

        match (response.str_field("uuid"), response.str_field("passcode")) {
            (Some(uuid), Some(passcode)) => {
                info!(stage = "register", worker_uuid = uuid, "Worker registered");
                Ok((uuid.to_string(), passcode.to_string()))
            }
            _ => Err(Error::Registration(
                "response is missing 'uuid' or 'passcode'".to_string(),
            )),
        }
    }

    /// Exchange the configured uuid and passcode for a session token.
    ///
    /// Wipes the working directory first, so anything left over from a
    /// previous run is gone.
    pub async fn enroll(&mut self) -> Result<()> {
        self.reset_task().await;
        self.identity = None;

        let (Some(worker_uuid), Some(passcode)) =
            (self.config.worker_uuid.clone(), self.config.passcode.clone())
        else {
            return Err(Error::Enrollment(
                "worker uuid and passcode must be configured".to_string(),
            ));
        };

        tokio::fs::create_dir_all(self.layout.root()).await?;
        self.layout.wipe().await?;

        let request = EnrollRequest {
            uuid: worker_uuid.clone(),
            passcode: passcode.clone(),
            worker_info: self.config.worker_info.clone(),
        };
        let response = self.master.enroll(&request).await?;

        let token = match (response.status, response.str_field("auth_token")) {
            (200, Some(token)) => AuthToken::new(token),
            (200, None) => {
                return Err(Error::Enrollment(
                    "response is missing 'auth_token'".to_string(),
                ));
            }
            (status, _) => {
                error!(
                    stage = "enroll",
                    status,
                    error = %response.error_message(),
                    "Enrollment rejected"
                );
                return Err(Error::Enrollment(format!(
                    "master returned {}: {}",
                    status,
                    response.error_message()
                )));
            }
        };

        self.identity = Some(WorkerIdentity {
            worker_uuid,
            auth_token: token,
            passcode,
            worker_type: self.config.worker_type,
            resource_id: self.config.resource_id,
            machine_type: self.config.machine_type,
        });
        info!(
            stage = "enroll",
            worker_uuid = %request.uuid,
            worker_type = %self.config.worker_type,
            machine_type = %self.config.machine_type,
            "Worker enrolled"
        );
        Ok(())
    }
}
