// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Enrollment, registration and polling against a scripted master.

mod common;

use common::{Harness, task_config};
use dcworker::{ErrorKind, PollOutcome, Worker};
use dcworker_master::{Endpoint, MockMaster};
use serde_json::json;

#[tokio::test]
async fn test_enroll_retains_token() {
    let harness = Harness::new().await;
    harness
        .master
        .push(Endpoint::Enroll, 200, json!({"auth_token": "tok-123"}));

    let mut worker = harness.worker("a");
    worker.enroll().await.unwrap();

    let identity = worker.identity().unwrap();
    assert_eq!(identity.auth_token.as_str(), "tok-123");
    assert_eq!(identity.worker_uuid, "worker-a");

    let call = &harness.master.calls_to(Endpoint::Enroll)[0];
    assert_eq!(call.body["uuid"], "worker-a");
    assert_eq!(call.body["passcode"], "passcode");
    assert_eq!(call.body["worker_info"], "test machine");
}

#[tokio::test]
async fn test_enroll_without_token_fails() {
    let harness = Harness::new().await;
    harness.master.push(Endpoint::Enroll, 200, json!({}));
    harness
        .master
        .push(Endpoint::Enroll, 403, json!({"error": "bad passcode"}));

    let mut worker = harness.worker("a");
    let err = worker.enroll().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Enrollment);
    assert!(!worker.is_enrolled());

    let err = worker.enroll().await.unwrap_err();
    assert!(err.to_string().contains("bad passcode"));
}

#[tokio::test]
async fn test_enroll_requires_credentials() {
    let harness = Harness::new().await;
    let mut config = harness.config("a");
    config.passcode = None;

    let mut worker = harness.build(config);
    let err = worker.enroll().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Enrollment);
    assert_eq!(harness.master.call_count(Endpoint::Enroll), 0);
}

#[tokio::test]
async fn test_enroll_wipes_workdir() {
    let harness = Harness::new().await;
    let worker = harness.worker("a");
    let root = worker.layout().root().to_path_buf();
    std::fs::create_dir_all(root.join("code/stale")).unwrap();
    std::fs::write(root.join("leftover.tar.gz"), b"x").unwrap();

    let mut worker = worker;
    worker.enroll().await.unwrap();

    assert!(root.is_dir());
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_register() {
    let master = MockMaster::new();
    master.push(
        Endpoint::Register,
        200,
        json!({"uuid": "w-new", "passcode": "secret"}),
    );
    master.push(Endpoint::Register, 200, json!({"uuid": "w-new"}));
    master.push(Endpoint::Register, 500, json!({"error": "db down"}));

    let (uuid, passcode) = Worker::register(&master, Some("task-7")).await.unwrap();
    assert_eq!((uuid.as_str(), passcode.as_str()), ("w-new", "secret"));
    assert_eq!(master.calls_to(Endpoint::Register)[0].body["task_uuid"], "task-7");

    let err = Worker::register(&master, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registration);

    let err = Worker::register(&master, None).await.unwrap_err();
    assert!(err.to_string().contains("db down"));
    // No retry.
    assert_eq!(master.call_count(Endpoint::Register), 3);
}

#[tokio::test]
async fn test_poll_without_identity_asks_for_reenroll() {
    let harness = Harness::new().await;
    let mut worker = harness.worker("a");

    let outcome = worker.poll().await;
    assert_eq!(outcome.flags(), (false, false, true, false));
    assert_eq!(harness.master.call_count(Endpoint::Poll), 0);
}

#[tokio::test]
async fn test_poll_no_task() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.master.push(Endpoint::Poll, 202, json!({"task": "ignored"}));

    let outcome = worker.poll().await;
    assert_eq!(outcome.flags(), (true, false, false, false));
    assert!(worker.task().is_none());
    assert!(worker.task_uuid().is_none());
    assert!(worker.is_enrolled());

    let call = &harness.master.calls_to(Endpoint::Poll)[0];
    assert_eq!(call.body["port"], 8000);
    assert_eq!(call.token.as_deref(), Some("mock-token"));
}

#[tokio::test]
async fn test_poll_401_drops_identity() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness
        .master
        .push(Endpoint::Poll, 401, json!({"config": task_config("t-1").to_string()}));

    let outcome = worker.poll().await;
    assert_eq!(outcome.flags(), (false, false, true, false));
    assert!(!worker.is_enrolled());
    assert!(worker.task().is_none());
}

#[tokio::test]
async fn test_poll_server_error_and_transport_error() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.master.push(Endpoint::Poll, 500, json!({}));
    harness.master.push_transport_error(Endpoint::Poll);

    assert_eq!(worker.poll().await, PollOutcome::Failed);
    assert_eq!(worker.poll().await, PollOutcome::Failed);
    assert!(worker.is_enrolled());
}

#[tokio::test]
async fn test_poll_task_ready() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;

    let task = worker.task().unwrap();
    assert_eq!(task.task_uuid, "t-1");
    assert_eq!(task.job_uuid, "job-1");
    assert_eq!(worker.task_uuid(), Some("t-1"));
}

#[tokio::test]
async fn test_poll_stops_task_left_running() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;
    worker.pre_run().await.unwrap();
    worker.run(None).await.unwrap();
    let ids = harness.runtime.container_ids().await;
    assert_eq!(ids.len(), 1);

    worker.poll().await;

    assert!(worker.context().is_none());
    assert_eq!(harness.runtime.killed().await, ids);
    assert_eq!(harness.runtime.removed().await, ids);
}

#[tokio::test]
async fn test_malformed_config_is_reported_failed() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;

    let mut config = task_config("t-bad");
    config.as_object_mut().unwrap().remove("task_role");
    harness
        .master
        .push(Endpoint::Poll, 200, json!({"config": config.to_string()}));

    let outcome = worker.poll().await;
    assert_eq!(outcome.flags(), (false, false, false, true));
    assert!(worker.task().is_none());
    assert_eq!(worker.task_uuid(), Some("t-bad"));

    assert!(worker.task_cleanup().await);
    assert_eq!(harness.master.task_actions(), vec!["failed".to_string()]);
    let call = &harness.master.calls_to(Endpoint::TaskAction)[0];
    assert_eq!(call.body["task_uuid"], "t-bad");
    assert!(worker.task_uuid().is_none());
}

#[tokio::test]
async fn test_poll_wait_uses_interval() {
    let harness = Harness::new().await;
    let worker = harness.worker("a");

    let started = std::time::Instant::now();
    worker.poll_wait().await;
    assert!(started.elapsed() >= worker.config().poll_interval);
}
