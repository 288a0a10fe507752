//! Crash recovery: rebuilding the index from on-disk state and reconciling
//! stale running markers against live PIDs.

mod common;

use common::TestContext;
use vessel::state::{RecordKind, StateStore};
use vessel::supervisor::record::ContainerStatusDoc;
use vessel::supervisor::state::ContainerState;
use vessel::{VesselOptions, VesselRuntime};
use vessel_shared::cri;

/// Overwrite a container's status document the way a crashed runtime would
/// have left it.
fn plant_status(data_dir: &std::path::Path, id: &str, doc: &ContainerStatusDoc) {
    let store = StateStore::new(data_dir.to_path_buf()).unwrap();
    store.save_status(RecordKind::Container, id, doc).unwrap();
}

fn reopen(data_dir: std::path::PathBuf) -> VesselRuntime {
    VesselRuntime::new(VesselOptions {
        data_dir,
        runtime: Some("overlay-sim".into()),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn records_survive_restart() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("idle", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();
    drop(ctx.runtime);

    let runtime = reopen(data_dir);
    let status = runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerCreated);

    let sandboxes = runtime.list_sandboxes(None);
    assert_eq!(sandboxes.len(), 1);
    assert_eq!(sandboxes[0].id, sandbox);

    // The recovered record still pins its image.
    assert_eq!(
        runtime.images().remove("alpine:latest").unwrap_err().kind(),
        vessel_shared::ErrorKind::InUse
    );
}

#[test]
fn stale_running_marker_with_dead_pid_resolves_to_exited() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("ghost", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();

    // A pid that existed and is now gone.
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    drop(ctx.runtime);
    plant_status(
        &data_dir,
        &id,
        &ContainerStatusDoc {
            state: ContainerState::Running,
            pid: Some(dead_pid),
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            exit_code: None,
            exit_signal: None,
            reason: String::new(),
            message: String::new(),
            proc_start_ticks: Some(12345),
            cgroup_path: None,
        },
    );

    let runtime = reopen(data_dir);
    let status = runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerExited);
    assert_eq!(status.exit_code, -1);
}

#[cfg(target_os = "linux")]
#[test]
fn live_pid_with_matching_start_time_rebinds_to_running() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("live", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();

    // A genuinely live process: this test process itself.
    let pid = std::process::id();
    let ticks = procfs_start_ticks(pid);

    drop(ctx.runtime);
    plant_status(
        &data_dir,
        &id,
        &ContainerStatusDoc {
            state: ContainerState::Running,
            pid: Some(pid),
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            exit_code: None,
            exit_signal: None,
            reason: String::new(),
            message: String::new(),
            proc_start_ticks: Some(ticks),
            cgroup_path: None,
        },
    );

    let runtime = reopen(data_dir);
    let status = runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerRunning);
}

#[cfg(target_os = "linux")]
#[test]
fn live_pid_with_mismatched_identity_becomes_unknown() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("imp", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();

    drop(ctx.runtime);
    plant_status(
        &data_dir,
        &id,
        &ContainerStatusDoc {
            state: ContainerState::Running,
            pid: Some(std::process::id()),
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            exit_code: None,
            exit_signal: None,
            reason: String::new(),
            message: String::new(),
            // Start time that cannot match this live process.
            proc_start_ticks: Some(1),
            cgroup_path: None,
        },
    );

    let runtime = reopen(data_dir);
    let status = runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerUnknown);
}

#[cfg(target_os = "linux")]
#[test]
fn live_pid_with_mismatched_cgroup_becomes_unknown() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("stray", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();

    // Pid and start time match this live process, but the recorded cgroup
    // is one it does not belong to.
    let pid = std::process::id();
    let ticks = procfs_start_ticks(pid);

    drop(ctx.runtime);
    plant_status(
        &data_dir,
        &id,
        &ContainerStatusDoc {
            state: ContainerState::Running,
            pid: Some(pid),
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            exit_code: None,
            exit_signal: None,
            reason: String::new(),
            message: String::new(),
            proc_start_ticks: Some(ticks),
            cgroup_path: Some("/vessel/not-this-process".into()),
        },
    );

    let runtime = reopen(data_dir);
    let status = runtime.container_status(&id).unwrap();
    assert_eq!(status.state, cri::ContainerState::ContainerUnknown);
}

#[test]
fn corrupt_record_surfaces_as_condition_not_panic() {
    let ctx = TestContext::new();
    ctx.import_test_image();
    let sandbox = ctx.sandbox("pod", "ns", 0);
    let id = ctx
        .runtime
        .create_container(&sandbox, TestContext::container_config("ok", &["true"]))
        .unwrap();
    let data_dir = ctx.runtime.options().data_dir.clone();
    drop(ctx.runtime);

    // Corrupt one record; the other must still recover.
    let broken_dir = data_dir.join("containers").join("not-a-ulid");
    std::fs::create_dir_all(&broken_dir).unwrap();
    std::fs::write(broken_dir.join("spec"), b"{garbage").unwrap();
    std::fs::write(broken_dir.join("status"), b"{garbage").unwrap();

    let runtime = reopen(data_dir);
    assert!(runtime.container_status(&id).is_ok());
    let conditions = runtime.runtime_status().conditions;
    assert!(
        conditions
            .iter()
            .any(|c| c.condition_type == "RecoveryWarning" && !c.status)
    );
}

#[cfg(target_os = "linux")]
fn procfs_start_ticks(pid: u32) -> u64 {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
    // Field 22, counting from 1; fields 2 may contain spaces inside parens,
    // so split after the closing paren.
    let rest = stat.rsplit_once(')').unwrap().1;
    rest.split_whitespace().nth(19).unwrap().parse().unwrap()
}
