// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment preparation and task launch.

mod common;

use std::collections::BTreeMap;

use common::{FileServer, Harness, tar_gz_bytes, task_config};
use dcworker::runner::{ContainerOverrides, MockContainerRuntime, MountMode};
use dcworker::{ErrorKind, MachineType, SignalState};
use dcworker_master::Endpoint;
use serde_json::{Value, json};

#[tokio::test]
async fn test_container_mounts_known_and_custom_datasets() {
    let server = FileServer::start().await;
    server.add("data.tar.gz", tar_gz_bytes(&[("train.csv", "1,2\n")]));

    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    let mut config = task_config("t-1");
    config["download_info"]["known_datasets"] = json!(["mnist"]);
    config["download_info"]["custom_dataset"] = json!({
        "url": [["data.tar.gz", server.url("data.tar.gz")]],
        "dataset_name": "job-1"
    });
    harness.assign(&mut worker, config).await;
    worker.fetch(true, true).await.unwrap();

    let spec = worker.container_spec(None).await.unwrap();
    let datasets: Vec<_> = spec
        .mounts
        .iter()
        .filter(|m| m.destination.starts_with("/data"))
        .collect();
    assert_eq!(datasets.len(), 2);

    let custom = datasets.iter().find(|m| m.destination == "/data").unwrap();
    assert_eq!(custom.source, harness.data_dir.join("job-1"));
    assert_eq!(custom.mode, MountMode::ReadWrite);

    let known = datasets
        .iter()
        .find(|m| m.destination == "/data/mnist")
        .unwrap();
    assert_eq!(known.source, harness.data_dir.join("mnist"));
    assert_eq!(known.mode, MountMode::ReadOnly);

    for (destination, source) in [
        ("/runtime/code", worker.layout().code_dir()),
        ("/runtime/output", worker.layout().output_dir()),
        ("/runtime/log", worker.layout().log_dir()),
    ] {
        let mount = spec
            .mounts
            .iter()
            .find(|m| m.destination == destination)
            .unwrap();
        assert_eq!(mount.source, source);
        assert_eq!(mount.mode, MountMode::ReadWrite);
    }
}

#[tokio::test]
async fn test_container_env_and_command() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    let config = task_config("t-1");
    harness.assign(&mut worker, config.clone()).await;

    let spec = worker.container_spec(None).await.unwrap();
    let cluster_spec: Value = serde_json::from_str(&spec.env["CLUSTER_SPEC"]).unwrap();
    assert_eq!(cluster_spec, config["cluster_spec"]);
    let command: Value = serde_json::from_str(&spec.env["COMMAND"]).unwrap();
    assert_eq!(command, config["command"]);

    assert_eq!(spec.env["TASK_UUID"], "t-1");
    assert_eq!(spec.env["TASK_INDEX"], "0");
    assert_eq!(spec.env["TASK_ROLE"], "worker");
    assert_eq!(spec.env["WORKER_TYPE"], "gpu");
    assert_eq!(spec.env["RESOURCE_ID"], "-1");
    assert_eq!(spec.env["DATASET"], "/data");
    assert_eq!(spec.env["CODE"], "/runtime/code");
    assert_eq!(spec.env["OUTPUT"], "/runtime/output");
    assert_eq!(spec.env["LOG"], "/runtime/log");

    assert_eq!(spec.image, "dc/tf:1.14");
    assert_eq!(spec.name.as_deref(), Some("dcworker-t-1"));
    assert_eq!(spec.user.as_deref(), Some("1000"));
    assert_eq!(spec.runtime.as_deref(), Some("nvidia"));
    assert_eq!(spec.working_dir.as_deref(), Some("/runtime/code"));
    assert_eq!(spec.command[..2], ["bash", "-c"]);
    let script = &spec.command[2];
    assert!(script.contains("conda activate deepcluster"));
    assert!(script.ends_with("python /runtime/worker_run.py"));
    assert!(!script.contains("conda install"));
}

#[tokio::test]
async fn test_container_installs_requirements_when_present() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;
    worker.fetch(true, false).await.unwrap();
    std::fs::write(worker.layout().requirements_file(), "numpy\n").unwrap();

    let spec = worker.container_spec(None).await.unwrap();
    assert!(spec.command[2].contains("conda install --yes --file /runtime/code/requirements.txt"));
}

#[tokio::test]
async fn test_container_overrides() {
    let harness = Harness::new().await;
    let mut config = harness.config("a");
    config.container_runtime = String::new();
    let mut worker = harness.build(config);
    worker.enroll().await.unwrap();
    harness.assign(&mut worker, task_config("t-1")).await;

    let overrides = ContainerOverrides {
        name: Some("trainer-0".to_string()),
        env: BTreeMap::from([
            ("TASK_UUID".to_string(), "spoofed".to_string()),
            ("NCCL_DEBUG".to_string(), "INFO".to_string()),
        ]),
        extra_args: vec!["--shm-size=8g".to_string()],
    };
    let spec = worker.container_spec(Some(&overrides)).await.unwrap();

    assert_eq!(spec.name.as_deref(), Some("trainer-0"));
    assert_eq!(spec.env["TASK_UUID"], "t-1");
    assert_eq!(spec.env["NCCL_DEBUG"], "INFO");
    assert_eq!(spec.extra_args, vec!["--shm-size=8g".to_string()]);
    assert!(spec.runtime.is_none());
}

#[tokio::test]
async fn test_pre_run_pulls_tagged_image() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;

    worker.pre_run().await.unwrap();
    assert_eq!(harness.runtime.pulled().await, vec!["dc/tf:1.14".to_string()]);
    assert!(worker.layout().output_dir().is_dir());
    assert!(worker.layout().log_dir().is_dir());
}

#[tokio::test]
async fn test_pre_run_fails_when_directories_exist() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;
    std::fs::create_dir_all(worker.layout().output_dir()).unwrap();

    let err = worker.pre_run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Prepare);
    assert!(harness.runtime.pulled().await.is_empty());
}

#[tokio::test]
async fn test_pre_run_image_errors() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    let mut config = task_config("t-1");
    config["container_image"] = Value::Null;
    harness.assign(&mut worker, config).await;
    let err = worker.pre_run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Prepare);

    let mut harness = Harness::new().await;
    harness.runtime = MockContainerRuntime::failing_pull();
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-2")).await;
    let err = worker.pre_run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Prepare);

    let harness = Harness::new().await;
    harness.runtime.remove_image("dc/tf:1.14").await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-3")).await;
    let err = worker.pre_run().await.unwrap_err();
    assert!(err.to_string().contains("not found after pull"));
}

#[tokio::test]
async fn test_run_streams_user_log() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;
    harness.assign(&mut worker, task_config("t-1")).await;
    worker.pre_run().await.unwrap();
    worker.run(None).await.unwrap();

    let launched = harness.runtime.launched().await;
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].image, "dc/tf:1.14");

    std::fs::write(
        worker.layout().user_log_file("t-1"),
        "epoch 1 loss 0.9\nepoch 2 loss 0.5\n",
    )
    .unwrap();
    harness.runtime.exit_all().await;
    let report = worker.signal().await.unwrap();
    assert_eq!(report.state, SignalState::FinishedGraceful);

    let lines: Vec<Value> = harness
        .master
        .calls_to(Endpoint::Log)
        .into_iter()
        .flat_map(|c| c.body["lines"].as_array().cloned().unwrap_or_default())
        .collect();
    assert_eq!(lines, vec![json!("epoch 1 loss 0.9"), json!("epoch 2 loss 0.5")]);
}

#[tokio::test]
async fn test_provisioned_task_runs_as_process() {
    let harness = Harness::new().await;
    let mut config = harness.config("a");
    config.machine_type = MachineType::Provisioned;
    config.python_bin = "true".to_string();
    config.conda_bin = "echo".to_string();
    let mut worker = harness.build(config);
    worker.enroll().await.unwrap();
    harness.assign(&mut worker, task_config("t-1")).await;

    worker.fetch(true, true).await.unwrap();
    std::fs::write(worker.layout().requirements_file(), "numpy\n").unwrap();
    worker.pre_run().await.unwrap();
    assert!(harness.runtime.pulled().await.is_empty());

    worker.run(None).await.unwrap();
    assert!(harness.runtime.launched().await.is_empty());

    // Keep the loop going should the process still be starting up.
    harness
        .master
        .push_repeated(Endpoint::TaskAction, 200, json!({"result": "continue"}), 1000);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let report = worker.signal().await.unwrap();
    assert_eq!(report.state, SignalState::FinishedGraceful);
    let actions = harness.master.task_actions();
    assert_eq!(actions.last().map(String::as_str), Some("finished"));
    assert!(worker.task().unwrap().finished);
}

#[tokio::test]
async fn test_run_requires_task() {
    let harness = Harness::new().await;
    let mut worker = harness.enrolled("a").await;

    let err = worker.run(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTask);

    let err = worker.pre_run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTask);
}
