//! End-to-end container lifecycle over the overlay-simulating backend.

mod common;

use std::time::{Duration, Instant};

use common::TestContext;
use vessel_shared::ErrorKind;
use vessel_shared::cri;

#[test]
fn run_echo_to_completion() {
    let ctx = TestContext::new();
    ctx.import_test_image();

    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("echo", &["echo", "hi"]))
        .unwrap();

    let created = ctx.runtime.container_status(&id).unwrap();
    assert_eq!(created.state, cri::ContainerState::ContainerCreated);

    ctx.runtime.start_container(&id).unwrap();
    let status = ctx.wait_exited(&id);
    assert_eq!(status.state, cri::ContainerState::ContainerExited);
    assert_eq!(status.exit_code, 0);
    assert!(status.finished_at >= status.started_at);

    // Pumps flush line-wise; give the tail a moment on slow machines.
    let mut log = Vec::new();
    for _ in 0..100 {
        log = ctx.runtime.read_log(&id, 0, 4096).unwrap().0;
        if !log.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(log, b"hi\n");
}

#[test]
fn stop_with_timeout_forces_termination() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();

    let begin = Instant::now();
    ctx.runtime.stop_container(&id, 1).unwrap();
    assert!(begin.elapsed() <= Duration::from_secs(3));

    let status = ctx.runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerExited);
    // `sleep` ignores nothing: the graceful signal already kills it, and a
    // truly stuck child gets SIGKILL. Either way the code reports a signal
    // death (128+signal).
    assert!(status.exit_code > 128, "exit_code = {}", status.exit_code);
}

#[test]
fn stop_is_idempotent_on_exited() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("true", &["true"]))
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();
    ctx.wait_exited(&id);

    ctx.runtime.stop_container(&id, 1).unwrap();
    ctx.runtime.stop_container(&id, 1).unwrap();
    let status = ctx.runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerExited);
}

#[test]
fn stop_on_created_is_a_no_op() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("idle", &["true"]))
        .unwrap();
    ctx.runtime.stop_container(&id, 1).unwrap();
    assert_eq!(
        ctx.runtime.container_status(&id).unwrap().state,
        cri::ContainerState::ContainerCreated
    );
}

#[test]
fn remove_missing_container_is_not_found() {
    let ctx = TestContext::new();
    let ghost = "01HZX5Y7N2B4C6D8E9F0G1H2J3";
    let err = ctx.runtime.remove_container(ghost, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    // Consistently NotFound, not a one-shot.
    let err = ctx.runtime.remove_container(ghost, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn start_requires_created_state() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("once", &["true"]))
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();
    ctx.wait_exited(&id);

    let err = ctx.runtime.start_container(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArg);
}

#[test]
fn remove_running_requires_force() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();

    let err = ctx.runtime.remove_container(&id, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InUse);

    ctx.runtime.remove_container(&id, true).unwrap();
    assert_eq!(
        ctx.runtime.container_status(&id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn start_failure_leaves_container_created() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("broken", &["no-such-binary-a8f2k"]),
        )
        .unwrap();

    let err = ctx.runtime.start_container(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StartFailed);
    assert!(err.to_string().contains("exec"));

    let status = ctx.runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerCreated);
}

#[test]
fn remove_in_use_image_refcounting() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("echo", &["echo", "hi"]))
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();
    ctx.wait_exited(&id);

    let err = ctx.runtime.images().remove("alpine:latest").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InUse);

    ctx.runtime.remove_container(&id, false).unwrap();
    ctx.runtime.images().remove("alpine:latest").unwrap();
    assert_eq!(
        ctx.runtime.images().get("alpine:latest").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn list_filters_by_state_and_labels() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let mut web = TestContext::container_config("web", &["sleep", "30"]);
    web.labels.insert("app".into(), "web".into());
    let web_id = ctx.runtime.create_container(&sandbox, web).unwrap();
    ctx.runtime.start_container(&web_id).unwrap();

    let mut db = TestContext::container_config("db", &["true"]);
    db.labels.insert("app".into(), "db".into());
    let db_id = ctx.runtime.create_container(&sandbox, db).unwrap();

    let filter = cri::ContainerFilter {
        state: Some(cri::ContainerState::ContainerRunning),
        label_selector: std::collections::HashMap::from([("app".to_string(), "web".to_string())]),
        ..Default::default()
    };
    let matched = ctx.runtime.list_containers(Some(&filter));
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, web_id);

    // Deterministic within a process: repeat listing yields the same order.
    let all_a = ctx.runtime.list_containers(None);
    let all_b = ctx.runtime.list_containers(None);
    assert_eq!(
        all_a.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        all_b.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    );
    assert_eq!(all_a.len(), 2);

    ctx.runtime.remove_container(&web_id, true).unwrap();
    ctx.runtime.remove_container(&db_id, false).unwrap();
}

#[test]
fn backend_fallback_rejects_namespace_spec() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    // Spec requesting a PID namespace: Unsupported on this backend.
    let mut strict = TestContext::container_config("strict", &["true"]);
    strict.linux = Some(cri::LinuxContainerConfig {
        security_context: Some(cri::LinuxContainerSecurityContext {
            namespace_options: Some(cri::NamespaceOption {
                pid: cri::NamespaceMode::Container,
                network: cri::NamespaceMode::Node,
                ipc: cri::NamespaceMode::Node,
                uts: cri::NamespaceMode::Node,
                target_id: String::new(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    let err = ctx.runtime.create_container(&sandbox, strict).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    // Relaxed spec: same container starts via the simulating VFS.
    let relaxed = TestContext::container_config("relaxed", &["true"]);
    let id = ctx.runtime.create_container(&sandbox, relaxed).unwrap();
    ctx.runtime.start_container(&id).unwrap();
    let status = ctx.wait_exited(&id);
    assert_eq!(status.exit_code, 0);
}

#[test]
fn exec_sync_runs_in_container_context() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();

    let out = ctx
        .runtime
        .exec_sync(&id, &["sh".into(), "-c".into(), "echo ran".into()], 10)
        .unwrap();
    assert_eq!(out.exit_code, 0);
    assert_eq!(out.stdout, b"ran\n");

    let err = ctx
        .runtime
        .exec_sync(&id, &["sleep".into(), "30".into()], 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    ctx.runtime.remove_container(&id, true).unwrap();
}

#[test]
fn exec_and_attach_return_short_lived_sessions() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();

    let exec = ctx
        .runtime
        .exec(&cri::ExecRequest {
            container_id: id.clone(),
            cmd: vec!["sh".into()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(exec.token.len(), 32);
    assert!(ctx.runtime.streams().resolve(&exec.token).is_some());

    let attach = ctx
        .runtime
        .attach(&cri::AttachRequest {
            container_id: id.clone(),
            ..Default::default()
        })
        .unwrap();
    assert_ne!(exec.token, attach.token);

    ctx.runtime.remove_container(&id, true).unwrap();
}

#[test]
fn stats_report_writable_layer_usage() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let id = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&id).unwrap();

    let stats = ctx.runtime.container_stats(&id).unwrap();
    assert!(stats.cpu.timestamp > 0);
    // The materialized tree contains the image files.
    assert!(stats.writable_layer.inodes_used > 0);

    ctx.runtime.remove_container(&id, true).unwrap();
}
