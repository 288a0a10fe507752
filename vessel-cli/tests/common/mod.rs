#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use tempfile::TempDir;

/// Per-test CLI context: isolated data dir, helper for building commands.
pub struct TestContext {
    pub temp: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("creating temp dir"),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    /// A `vessel` command pinned to this context's data dir and the
    /// overlay-simulating backend (runs unprivileged everywhere).
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_vessel"));
        cmd.timeout(Duration::from_secs(60));
        cmd.arg("--data-dir").arg(self.data_dir());
        cmd.arg("--runtime").arg("overlay-sim");
        cmd
    }

    /// Build a tiny rootfs tarball on disk.
    pub fn make_tarball(&self) -> PathBuf {
        let payload = self.temp.path().join("payload");
        std::fs::create_dir_all(payload.join("etc")).unwrap();
        std::fs::write(payload.join("etc/os-release"), b"NAME=test\n").unwrap();

        let tar_path = self.temp.path().join("image.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&tar_path).unwrap());
        builder.append_dir_all(".", &payload).unwrap();
        builder.into_inner().unwrap();
        tar_path
    }

    /// Import the tarball as `alpine:latest`.
    pub fn import_image(&self) {
        let tarball = self.make_tarball();
        self.cmd()
            .args(["images", "import", path_str(&tarball), "--tag", "alpine:latest"])
            .assert()
            .success();
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}
