//! Pod sandbox lifecycle, containment, and filters.

mod common;

use common::TestContext;
use vessel_shared::ErrorKind;
use vessel_shared::cri;

#[test]
fn duplicate_metadata_triple_rejected() {
    let ctx = TestContext::new();
    ctx.sandbox("pod", "ns", 0);

    let node = cri::NamespaceMode::Node;
    let config = cri::PodSandboxConfig {
        metadata: cri::PodSandboxMetadata {
            name: "pod".into(),
            uid: "different-uid".into(),
            namespace: "ns".into(),
            attempt: 0,
        },
        linux: Some(cri::LinuxPodSandboxConfig {
            namespace_options: cri::NamespaceOption {
                network: node,
                pid: node,
                ipc: node,
                uts: node,
                target_id: String::new(),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let err = ctx.runtime.run_sandbox(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // A new attempt of the same pod is fine.
    ctx.sandbox("pod", "ns", 1);
}

#[test]
fn remove_requires_stop_first() {
    let ctx = TestContext::new();
    let id = ctx.sandbox("pod", "ns", 0);

    let err = ctx.runtime.remove_sandbox(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InUse);

    ctx.runtime.stop_sandbox(&id).unwrap();
    ctx.runtime.remove_sandbox(&id).unwrap();
    assert_eq!(
        ctx.runtime.sandbox_status(&id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn stop_is_idempotent() {
    let ctx = TestContext::new();
    let id = ctx.sandbox("pod", "ns", 0);
    ctx.runtime.stop_sandbox(&id).unwrap();
    ctx.runtime.stop_sandbox(&id).unwrap();
    let status = ctx.runtime.sandbox_status(&id).unwrap();
    assert_eq!(status.state, cri::PodSandboxState::SandboxNotReady);
}

#[test]
fn removal_blocked_while_members_live_then_cascades() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);

    let member = ctx
        .runtime
        .create_container(
            &sandbox,
            TestContext::container_config("sleeper", &["sleep", "30"]),
        )
        .unwrap();
    ctx.runtime.start_container(&member).unwrap();

    let err = ctx.runtime.remove_sandbox(&sandbox).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InUse);

    // Stop transitions members to terminal states in reverse creation
    // order, then removal cascades to member records.
    ctx.runtime.stop_sandbox(&sandbox).unwrap();
    ctx.runtime.remove_sandbox(&sandbox).unwrap();

    assert_eq!(
        ctx.runtime.container_status(&member).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn stopping_sandbox_quiesces_creates() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    ctx.runtime.stop_sandbox(&sandbox).unwrap();

    let err = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("late", &["true"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArg);
}

#[test]
fn label_selector_filters_sandboxes() {
    let ctx = TestContext::new();
    let web1 = ctx.sandbox_with_labels("web-1", "ns", 0, &[("app", "web")]);
    let web2 = ctx.sandbox_with_labels("web-2", "ns", 0, &[("app", "web")]);
    let _db = ctx.sandbox_with_labels("db-1", "ns", 0, &[("app", "db")]);

    let filter = cri::PodSandboxFilter {
        label_selector: std::collections::HashMap::from([("app".to_string(), "web".to_string())]),
        ..Default::default()
    };
    let matched = ctx.runtime.list_sandboxes(Some(&filter));
    let mut ids: Vec<String> = matched.iter().map(|s| s.id.clone()).collect();
    ids.sort();
    let mut expected = vec![web1, web2];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn state_filter_matches_only_ready() {
    let ctx = TestContext::new();
    let ready = ctx.sandbox("ready", "ns", 0);
    let stopped = ctx.sandbox("stopped", "ns", 0);
    ctx.runtime.stop_sandbox(&stopped).unwrap();

    let filter = cri::PodSandboxFilter {
        state: Some(cri::PodSandboxState::SandboxReady),
        ..Default::default()
    };
    let matched = ctx.runtime.list_sandboxes(Some(&filter));
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, ready);
}

#[test]
fn status_projects_metadata_and_namespaces() {
    let ctx = TestContext::new();
    let id = ctx.sandbox_with_labels("pod", "ns", 2, &[("tier", "backend")]);

    let status = ctx.runtime.sandbox_status(&id).unwrap();
    assert_eq!(status.metadata.name, "pod");
    assert_eq!(status.metadata.attempt, 2);
    assert_eq!(status.state, cri::PodSandboxState::SandboxReady);
    assert_eq!(status.namespace_options.pid, cri::NamespaceMode::Node);
    assert_eq!(status.labels.get("tier").map(String::as_str), Some("backend"));
    assert!(status.created_at > 0);
}

#[test]
fn port_forward_session_requires_known_sandbox() {
    let ctx = TestContext::new();
    let id = ctx.sandbox("pod", "ns", 0);

    let session = ctx
        .runtime
        .port_forward(&cri::PortForwardRequest {
            pod_sandbox_id: id,
            port: vec![8080],
        })
        .unwrap();
    assert_eq!(session.token.len(), 32);

    let err = ctx
        .runtime
        .port_forward(&cri::PortForwardRequest {
            pod_sandbox_id: "01HZX5Y7N2B4C6D8E9F0G1H2J3".into(),
            port: vec![80],
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
