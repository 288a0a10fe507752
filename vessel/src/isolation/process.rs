//! Host-process launch path for the simulating backends.
//!
//! Without kernel namespaces the "container" is a supervised host process
//! whose working directory is confined to the container tree and whose
//! environment is exactly the container environment.

use std::process::{Command, Stdio};

use vessel_shared::{VesselError, VesselResult};

use super::{LaunchSpec, Launched, WaitHandle};
use crate::vfs::path::confine;

const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub(crate) fn spawn(spec: &LaunchSpec) -> VesselResult<Launched> {
    let workdir = confine(&spec.rootfs, &spec.working_dir)?;
    if !workdir.is_dir() {
        return Err(VesselError::start_failed(
            "chdir",
            format!("working directory {} does not exist", spec.working_dir),
        ));
    }

    let mut cmd = Command::new(&spec.command[0]);
    cmd.args(&spec.command[1..])
        .current_dir(&workdir)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Program lookup needs a PATH; the container environment wins when it
    // carries one, otherwise the host binaries are what this backend runs.
    let has_path = spec.env.iter().any(|(k, _)| k == "PATH");
    if !has_path {
        cmd.env(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
        );
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| VesselError::start_failed("exec", format!("{}: {}", spec.command[0], e)))?;

    let stdout = child
        .stdout
        .take()
        .map(|s| Box::new(s) as Box<dyn std::io::Read + Send>);
    let stderr = child
        .stderr
        .take()
        .map(|s| Box::new(s) as Box<dyn std::io::Read + Send>);

    tracing::debug!(
        container_id = %spec.container_id,
        pid = child.id(),
        "spawned process-backend child"
    );

    Ok(Launched {
        pid: child.id(),
        stdout,
        stderr,
        wait: WaitHandle::Child(child),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::{CapabilityPlan, IdMapConfig, NamespacePlan};
    use crate::ids::ContainerId;

    #[test]
    fn unknown_program_is_start_failed_exec() {
        let tmp = tempfile::TempDir::new().unwrap();
        let spec = LaunchSpec {
            container_id: ContainerId::generate(),
            rootfs: tmp.path().to_path_buf(),
            command: vec!["definitely-not-a-real-binary-4712".into()],
            env: vec![],
            working_dir: "/".into(),
            plan: NamespacePlan::host(),
            idmap: IdMapConfig::for_caller(),
            caps: CapabilityPlan::default(),
            no_new_privs: false,
            supplemental_groups: vec![],
            mounts: vec![],
        };
        let err = spawn(&spec).unwrap_err();
        match err {
            VesselError::StartFailed { stage, .. } => assert_eq!(stage, "exec"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
