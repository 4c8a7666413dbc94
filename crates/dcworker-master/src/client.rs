// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Master API trait and its reqwest-backed implementation.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::MasterConfig;
use crate::error::Result;
use crate::types::{
    AuthToken, ENROLL_PATH, EnrollRequest, LogBatch, MasterResponse, POLL_PATH, PollRequest,
    REGISTER_PATH, RegisterRequest, TASK_PATH, TaskActionRequest, TensorboardRequest,
    task_detail_path, task_log_path,
};

/// Calls the worker consumes from the master server.
///
/// Every method returns the raw status and body; only transport failures are
/// errors. Callers decide what a 202, 401 or 5xx means for their stage.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// `POST /api/v1/worker/register/`
    async fn register(&self, request: &RegisterRequest) -> Result<MasterResponse>;

    /// `POST /api/v1/worker/enroll/`
    async fn enroll(&self, request: &EnrollRequest) -> Result<MasterResponse>;

    /// `POST /api/v1/worker/poll/`
    async fn poll(&self, token: &AuthToken, request: &PollRequest) -> Result<MasterResponse>;

    /// `POST /api/v1/worker/task/`
    async fn task_action(
        &self,
        token: &AuthToken,
        request: &TaskActionRequest,
    ) -> Result<MasterResponse>;

    /// `PUT /api/v1/worker/task/{uuid}/`
    async fn tensorboard_created(&self, token: &AuthToken, task_uuid: &str)
    -> Result<MasterResponse>;

    /// `POST /api/v1/worker/task/{uuid}/log/`
    async fn push_log(&self, token: &AuthToken, batch: &LogBatch) -> Result<MasterResponse>;
}

/// HTTP client for the master server.
#[derive(Debug, Clone)]
pub struct HttpMasterClient {
    http: reqwest::Client,
    config: MasterConfig,
}

impl HttpMasterClient {
    /// Create a client with the given configuration.
    pub fn new(config: MasterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        token: Option<&AuthToken>,
    ) -> Result<MasterResponse> {
        let url = self.config.url(path);
        let mut request = self.http.request(method.clone(), &url).json(body);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token.header_value());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        debug!(method = %method, url = %url, status, "Master responded");
        Ok(MasterResponse { status, body })
    }
}

#[async_trait]
impl MasterApi for HttpMasterClient {
    #[instrument(skip(self, request))]
    async fn register(&self, request: &RegisterRequest) -> Result<MasterResponse> {
        self.send(Method::POST, REGISTER_PATH, request, None).await
    }

    #[instrument(skip(self, request), fields(uuid = %request.uuid))]
    async fn enroll(&self, request: &EnrollRequest) -> Result<MasterResponse> {
        self.send(Method::POST, ENROLL_PATH, request, None).await
    }

    async fn poll(&self, token: &AuthToken, request: &PollRequest) -> Result<MasterResponse> {
        self.send(Method::POST, POLL_PATH, request, Some(token))
            .await
    }

    #[instrument(skip(self, token, request), fields(task_uuid = %request.task_uuid, action = %request.action))]
    async fn task_action(
        &self,
        token: &AuthToken,
        request: &TaskActionRequest,
    ) -> Result<MasterResponse> {
        self.send(Method::POST, TASK_PATH, request, Some(token))
            .await
    }

    async fn tensorboard_created(
        &self,
        token: &AuthToken,
        task_uuid: &str,
    ) -> Result<MasterResponse> {
        self.send(
            Method::PUT,
            &task_detail_path(task_uuid),
            &TensorboardRequest::default(),
            Some(token),
        )
        .await
    }

    async fn push_log(&self, token: &AuthToken, batch: &LogBatch) -> Result<MasterResponse> {
        self.send(
            Method::POST,
            &task_log_path(&batch.task_uuid),
            batch,
            Some(token),
        )
        .await
    }
}
