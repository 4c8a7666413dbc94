// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response types for the master-server API.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST` - create a worker account.
pub const REGISTER_PATH: &str = "/api/v1/worker/register/";
/// `POST` - exchange uuid + passcode for a session token.
pub const ENROLL_PATH: &str = "/api/v1/worker/enroll/";
/// `POST` - ask for an assigned task.
pub const POLL_PATH: &str = "/api/v1/worker/poll/";
/// `POST` - report progress / finished / failed for a task.
pub const TASK_PATH: &str = "/api/v1/worker/task/";

/// `PUT` - per-task update (tensorboard creation).
pub fn task_detail_path(task_uuid: &str) -> String {
    format!("{}{}/", TASK_PATH, task_uuid)
}

/// `POST` - user log lines for a task.
pub fn task_log_path(task_uuid: &str) -> String {
    format!("{}{}/log/", TASK_PATH, task_uuid)
}

/// Session token returned by enroll. The value is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Token {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Body of the register call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Optional task to bind the new worker to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_uuid: Option<String>,
}

/// Body of the enroll call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    /// Worker uuid from registration.
    pub uuid: String,
    /// Passcode from registration.
    pub passcode: String,
    /// Free-form description of the worker machine.
    pub worker_info: String,
}

/// Body of the poll call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    /// Local port the worker reports to the master.
    pub port: u16,
}

/// Action reported for a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Keep-alive while the task is running.
    Progress,
    /// The task exited gracefully.
    Finished,
    /// The task crashed or could not be run.
    Failed,
}

impl TaskAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Progress => "progress",
            TaskAction::Finished => "finished",
            TaskAction::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the task action call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskActionRequest {
    /// Task being reported.
    pub task_uuid: String,
    /// What happened.
    pub action: TaskAction,
}

/// Body of the tensorboard update call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorboardRequest {
    /// Always `1`.
    pub tensorboard_created: u8,
}

impl Default for TensorboardRequest {
    fn default() -> Self {
        Self {
            tensorboard_created: 1,
        }
    }
}

/// A batch of user log lines forwarded while a task runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    /// Job the task belongs to.
    pub job_uuid: String,
    /// Task producing the log.
    pub task_uuid: String,
    /// Log channel, `user` for the task's own log file.
    pub log_type: String,
    /// Lines without trailing newlines.
    pub lines: Vec<String>,
}

/// Presigned POST target for uploading task artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedPost {
    /// Object storage URL.
    pub url: String,
    /// Form fields that must accompany the file part.
    pub fields: HashMap<String, String>,
}

/// Raw status and JSON body returned by the master.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, or `Null` when empty.
    pub body: Value,
}

impl MasterResponse {
    /// Build a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx status (retryable).
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Non-empty string field of the body.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The `error` field, for logging.
    pub fn error_message(&self) -> String {
        match self.body.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "<none>".to_string(),
        }
    }

    /// The `result` field of a task action response.
    pub fn task_result(&self) -> Option<&str> {
        self.body.get("result").and_then(Value::as_str)
    }

    /// Whether the master asked the worker to start tensorboard.
    pub fn wants_tensorboard(&self) -> bool {
        match self.body.get("create_tensorboard") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            _ => false,
        }
    }

    /// Extract `task_data.upload_urls.output` as a presigned POST.
    ///
    /// The error names the first missing piece of the path.
    pub fn output_upload(&self) -> Result<PresignedPost, String> {
        let task_data = self
            .body
            .get("task_data")
            .filter(|v| !v.is_null())
            .ok_or_else(|| "missing 'task_data'".to_string())?;
        let upload_urls = task_data
            .get("upload_urls")
            .filter(|v| !v.is_null())
            .ok_or_else(|| "missing 'upload_urls' inside 'task_data'".to_string())?;
        let output = upload_urls
            .get("output")
            .filter(|v| !v.is_null())
            .ok_or_else(|| "missing 'output' inside 'task_data[upload_urls]'".to_string())?;

        let url = output
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'url' inside 'task_data[upload_urls][output]'".to_string())?;
        let fields = output
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                "missing 'fields' inside 'task_data[upload_urls][output]'".to_string()
            })?;

        Ok(PresignedPost {
            url: url.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_action_wire_names() {
        let body = serde_json::to_value(TaskActionRequest {
            task_uuid: "t-1".to_string(),
            action: TaskAction::Progress,
        })
        .unwrap();
        assert_eq!(body, json!({"task_uuid": "t-1", "action": "progress"}));
        assert_eq!(TaskAction::Failed.to_string(), "failed");
    }

    #[test]
    fn test_register_request_omits_missing_task() {
        let body = serde_json::to_value(RegisterRequest::default()).unwrap();
        assert_eq!(body, json!({}));
    }

    #[test]
    fn test_auth_token_is_redacted() {
        let token = AuthToken::new("secret");
        assert_eq!(format!("{:?}", token), "AuthToken(***)");
        assert_eq!(token.header_value(), "Token secret");
    }

    #[test]
    fn test_paths() {
        assert_eq!(task_detail_path("abc"), "/api/v1/worker/task/abc/");
        assert_eq!(task_log_path("abc"), "/api/v1/worker/task/abc/log/");
    }

    #[test]
    fn test_wants_tensorboard_truthiness() {
        assert!(MasterResponse::new(200, json!({"create_tensorboard": true})).wants_tensorboard());
        assert!(MasterResponse::new(200, json!({"create_tensorboard": 1})).wants_tensorboard());
        assert!(!MasterResponse::new(200, json!({"create_tensorboard": 0})).wants_tensorboard());
        assert!(!MasterResponse::new(200, json!({})).wants_tensorboard());
    }

    #[test]
    fn test_output_upload_parsed() {
        let response = MasterResponse::new(
            200,
            json!({
                "result": "stop",
                "task_data": {"upload_urls": {"output": {
                    "url": "https://bucket/upload",
                    "fields": {"key": "out/${filename}", "x-amz-expires": 300}
                }}}
            }),
        );
        let post = response.output_upload().unwrap();
        assert_eq!(post.url, "https://bucket/upload");
        assert_eq!(post.fields["key"], "out/${filename}");
        assert_eq!(post.fields["x-amz-expires"], "300");
    }

    #[test]
    fn test_output_upload_reports_missing_piece() {
        let response = MasterResponse::new(200, json!({"task_data": {"upload_urls": {}}}));
        let err = response.output_upload().unwrap_err();
        assert!(err.contains("'output'"));

        let response = MasterResponse::new(200, json!({"result": "stop"}));
        assert_eq!(response.output_upload().unwrap_err(), "missing 'task_data'");
    }

    #[test]
    fn test_status_classes() {
        assert!(MasterResponse::new(202, Value::Null).is_success());
        assert!(MasterResponse::new(503, Value::Null).is_server_error());
        assert!(!MasterResponse::new(404, Value::Null).is_server_error());
    }
}
