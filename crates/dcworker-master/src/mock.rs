// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted master for testing.
//!
//! Responses are queued per endpoint and consumed in order. When a queue is
//! empty a fixed default is returned. Every call is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::client::MasterApi;
use crate::error::{MasterError, Result};
use crate::types::{
    AuthToken, EnrollRequest, LogBatch, MasterResponse, PollRequest, RegisterRequest,
    TaskActionRequest, TensorboardRequest,
};

/// Master endpoint a call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `/worker/register/`
    Register,
    /// `/worker/enroll/`
    Enroll,
    /// `/worker/poll/`
    Poll,
    /// `/worker/task/`
    TaskAction,
    /// `/worker/task/{uuid}/`
    Tensorboard,
    /// `/worker/task/{uuid}/log/`
    Log,
}

/// A call observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Endpoint called.
    pub endpoint: Endpoint,
    /// JSON body sent.
    pub body: Value,
    /// Token sent, if any.
    pub token: Option<String>,
}

#[derive(Debug)]
enum Scripted {
    Respond(MasterResponse),
    TransportError,
}

/// Mock master server.
#[derive(Default)]
pub struct MockMaster {
    scripted: Mutex<HashMap<Endpoint, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockMaster {
    /// Create a mock with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an endpoint.
    pub fn push(&self, endpoint: Endpoint, status: u16, body: Value) -> &Self {
        lock(&self.scripted)
            .entry(endpoint)
            .or_default()
            .push_back(Scripted::Respond(MasterResponse::new(status, body)));
        self
    }

    /// Queue the same response `times` times.
    pub fn push_repeated(&self, endpoint: Endpoint, status: u16, body: Value, times: usize) -> &Self {
        for _ in 0..times {
            self.push(endpoint, status, body.clone());
        }
        self
    }

    /// Queue a transport failure for an endpoint.
    pub fn push_transport_error(&self, endpoint: Endpoint) -> &Self {
        lock(&self.scripted)
            .entry(endpoint)
            .or_default()
            .push_back(Scripted::TransportError);
        self
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Recorded calls against one endpoint.
    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Number of calls against one endpoint.
    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }

    /// The `action` of every task action call, in order.
    pub fn task_actions(&self) -> Vec<String> {
        self.calls_to(Endpoint::TaskAction)
            .into_iter()
            .filter_map(|c| c.body.get("action").and_then(Value::as_str).map(String::from))
            .collect()
    }

    fn default_response(endpoint: Endpoint) -> MasterResponse {
        match endpoint {
            Endpoint::Register => MasterResponse::new(
                200,
                json!({"uuid": "mock-worker-uuid", "passcode": "mock-passcode"}),
            ),
            Endpoint::Enroll => MasterResponse::new(200, json!({"auth_token": "mock-token"})),
            Endpoint::Poll => MasterResponse::new(202, json!({})),
            Endpoint::TaskAction => MasterResponse::new(200, json!({})),
            Endpoint::Tensorboard => {
                MasterResponse::new(200, json!({"tensorboard_url": "http://mock:6006"}))
            }
            Endpoint::Log => MasterResponse::new(200, json!({})),
        }
    }

    fn answer<B: Serialize>(
        &self,
        endpoint: Endpoint,
        body: &B,
        token: Option<&AuthToken>,
    ) -> Result<MasterResponse> {
        lock(&self.calls).push(RecordedCall {
            endpoint,
            body: serde_json::to_value(body)?,
            token: token.map(|t| t.as_str().to_string()),
        });

        let next = lock(&self.scripted)
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::TransportError) => Err(MasterError::Transport(format!(
                "scripted transport failure for {:?}",
                endpoint
            ))),
            None => Ok(Self::default_response(endpoint)),
        }
    }
}

#[async_trait]
impl MasterApi for MockMaster {
    async fn register(&self, request: &RegisterRequest) -> Result<MasterResponse> {
        self.answer(Endpoint::Register, request, None)
    }

    async fn enroll(&self, request: &EnrollRequest) -> Result<MasterResponse> {
        self.answer(Endpoint::Enroll, request, None)
    }

    async fn poll(&self, token: &AuthToken, request: &PollRequest) -> Result<MasterResponse> {
        self.answer(Endpoint::Poll, request, Some(token))
    }

    async fn task_action(
        &self,
        token: &AuthToken,
        request: &TaskActionRequest,
    ) -> Result<MasterResponse> {
        self.answer(Endpoint::TaskAction, request, Some(token))
    }

    async fn tensorboard_created(
        &self,
        token: &AuthToken,
        task_uuid: &str,
    ) -> Result<MasterResponse> {
        let _ = task_uuid;
        self.answer(
            Endpoint::Tensorboard,
            &TensorboardRequest::default(),
            Some(token),
        )
    }

    async fn push_log(&self, token: &AuthToken, batch: &LogBatch) -> Result<MasterResponse> {
        self.answer(Endpoint::Log, batch, Some(token))
    }
}
