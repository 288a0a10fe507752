#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;
use vessel::{VesselOptions, VesselRuntime};
use vessel_shared::cri;

/// Test context with an isolated runtime on the overlay-simulating backend
/// (runs unprivileged everywhere) and automatic cleanup.
pub struct TestContext {
    pub runtime: VesselRuntime,
    pub temp: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("creating temp dir");
        let runtime = VesselRuntime::new(Self::options(temp.path().join("state")))
            .expect("creating runtime");
        Self { runtime, temp }
    }

    pub fn options(data_dir: PathBuf) -> VesselOptions {
        VesselOptions {
            data_dir,
            runtime: Some("overlay-sim".into()),
            ..Default::default()
        }
    }

    /// Build a small rootfs tarball and import it as `alpine:latest`.
    pub fn import_test_image(&self) -> String {
        self.import_image_tagged("alpine:latest")
    }

    pub fn import_image_tagged(&self, tag: &str) -> String {
        let payload = self.temp.path().join(format!("payload-{}", tag.replace([':', '/'], "-")));
        std::fs::create_dir_all(payload.join("bin")).unwrap();
        std::fs::create_dir_all(payload.join("etc")).unwrap();
        std::fs::write(payload.join("etc/os-release"), format!("NAME={}\n", tag)).unwrap();
        std::fs::write(payload.join("bin/entry"), b"#!/bin/sh\n").unwrap();

        let tar_path = self
            .temp
            .path()
            .join(format!("{}.tar", tag.replace([':', '/'], "-")));
        let mut builder = tar::Builder::new(std::fs::File::create(&tar_path).unwrap());
        builder.append_dir_all(".", &payload).unwrap();
        builder.into_inner().unwrap();

        let record = self
            .runtime
            .images()
            .import(&tar_path, vec![tag.to_string()])
            .unwrap();
        record.digest
    }

    /// Create a sandbox whose namespaces are all node-mode (runs on the
    /// simulating backends).
    pub fn sandbox(&self, name: &str, namespace: &str, attempt: u32) -> String {
        self.sandbox_with_labels(name, namespace, attempt, &[])
    }

    pub fn sandbox_with_labels(
        &self,
        name: &str,
        namespace: &str,
        attempt: u32,
        labels: &[(&str, &str)],
    ) -> String {
        let node = cri::NamespaceMode::Node;
        let config = cri::PodSandboxConfig {
            metadata: cri::PodSandboxMetadata {
                name: name.into(),
                uid: format!("uid-{}", name),
                namespace: namespace.into(),
                attempt,
            },
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
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
        self.runtime.run_sandbox(config).unwrap()
    }

    /// Container config running `cmd` from the test image.
    pub fn container_config(name: &str, cmd: &[&str]) -> cri::ContainerConfig {
        cri::ContainerConfig {
            metadata: cri::ContainerMetadata {
                name: name.into(),
                attempt: 0,
            },
            image: cri::ImageSpec {
                image: "alpine:latest".into(),
            },
            command: vec![cmd[0].to_string()],
            args: cmd[1..].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Poll container status until it reaches a terminal state.
    pub fn wait_exited(&self, id: &str) -> cri::ContainerStatus {
        for _ in 0..400 {
            let status = self.runtime.container_status(id).unwrap();
            if matches!(
                status.state,
                cri::ContainerState::ContainerExited | cri::ContainerState::ContainerUnknown
            ) {
                return status;
            }
            std::thread::sleep(std::time::Duration::from_millis(25));
        }
        panic!("container {} never reached a terminal state", id);
    }
}
