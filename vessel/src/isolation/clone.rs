//! Namespaced child creation (parent side).
//!
//! The child is cloned directly into its new namespaces, then parent and
//! child synchronize over pipes: the parent writes the UID/GID maps while
//! the child blocks, and a close-on-exec error pipe carries pre-exec
//! failures back as `StartFailed{stage}`.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sched::CloneFlags;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use vessel_shared::{VesselError, VesselResult};

use super::child::{self, ChildContext};
use super::{LaunchSpec, Launched, WaitHandle, idmap};

/// Field separator in the child's failure report: `stage\x1fmessage`.
pub(crate) const STAGE_SEP: u8 = 0x1f;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

pub(crate) fn spawn(spec: &LaunchSpec) -> VesselResult<Launched> {
    let (stdout_r, stdout_w) = make_pipe("stdout")?;
    let (stderr_r, stderr_w) = make_pipe("stderr")?;
    // Parent signals the child to continue once the maps are in place.
    let (sync_r, sync_w) = make_pipe("sync")?;
    let (err_r, err_w) = make_pipe("error")?;
    set_cloexec(&err_w)?;

    let mut flags = CloneFlags::empty();
    if spec.plan.new_user {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    if spec.plan.new_mount {
        flags |= CloneFlags::CLONE_NEWNS;
    }
    if spec.plan.new_pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if spec.plan.new_net {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if spec.plan.new_ipc {
        flags |= CloneFlags::CLONE_NEWIPC;
    }
    if spec.plan.new_uts {
        flags |= CloneFlags::CLONE_NEWUTS;
    }

    let ctx = ChildContext {
        stdout_w: stdout_w.as_raw_fd(),
        stderr_w: stderr_w.as_raw_fd(),
        sync_r: sync_r.as_raw_fd(),
        err_w: err_w.as_raw_fd(),
    };

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    // SAFETY: the callback only runs in the cloned child; the parent's copy
    // of captured state is untouched.
    let pid = unsafe {
        nix::sched::clone(
            Box::new(|| child::run(spec, &ctx)),
            &mut stack,
            flags,
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| VesselError::start_failed("clone", e))?;

    // Child-side descriptors stay with the child.
    drop(stdout_w);
    drop(stderr_w);
    drop(sync_r);
    drop(err_w);

    if spec.plan.new_user
        && let Err(e) = idmap::write_maps(pid.as_raw() as u32, &spec.idmap)
    {
        abort_child(pid);
        return Err(e);
    }

    // Release the child; it proceeds to mounts, pivot, and exec.
    if nix::unistd::write(&sync_w, &[1u8]).is_err() {
        abort_child(pid);
        return Err(VesselError::start_failed(
            "sync",
            "child exited before setup completed",
        ));
    }
    drop(sync_w);

    // EOF means exec happened (the error pipe is close-on-exec); any bytes
    // are a stage report from a failed pre-exec step.
    let mut report = Vec::new();
    let mut err_file = File::from(err_r);
    err_file
        .read_to_end(&mut report)
        .map_err(|e| VesselError::Internal(format!("reading child status: {}", e)))?;

    if !report.is_empty() {
        let _ = waitpid(pid, None);
        return Err(parse_stage_report(&report));
    }

    tracing::debug!(
        container_id = %spec.container_id,
        pid = pid.as_raw(),
        "namespaced child exec'd"
    );

    Ok(Launched {
        pid: pid.as_raw() as u32,
        stdout: Some(Box::new(File::from(stdout_r))),
        stderr: Some(Box::new(File::from(stderr_r))),
        wait: WaitHandle::Pid(pid.as_raw() as u32),
    })
}

fn make_pipe(purpose: &str) -> VesselResult<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe()
        .map_err(|e| VesselError::Internal(format!("creating {} pipe: {}", purpose, e)))
}

fn set_cloexec(fd: &OwnedFd) -> VesselResult<()> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| VesselError::Internal(format!("marking error pipe cloexec: {}", e)))?;
    Ok(())
}

fn abort_child(pid: Pid) {
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
    let _ = waitpid(pid, None);
}

fn parse_stage_report(report: &[u8]) -> VesselError {
    let mut parts = report.splitn(2, |b| *b == STAGE_SEP);
    let stage = parts
        .next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default();
    let message = parts
        .next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default();

    let stage: &'static str = match stage.as_str() {
        "setns" => "setns",
        "hostname" => "hostname",
        "mounts" => "mounts",
        "pivot_root" => "pivot_root",
        "caps" => "caps",
        "no_new_privs" => "no_new_privs",
        "setgroups" => "setgroups",
        "setuid" => "setuid",
        "chdir" => "chdir",
        "exec" => "exec",
        _ => "child",
    };
    VesselError::StartFailed {
        stage,
        cause: message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_report_parses() {
        let mut report = b"pivot_root".to_vec();
        report.push(STAGE_SEP);
        report.extend_from_slice(b"EINVAL");
        match parse_stage_report(&report) {
            VesselError::StartFailed { stage, cause } => {
                assert_eq!(stage, "pivot_root");
                assert_eq!(cause, "EINVAL");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn unknown_stage_collapses_to_child() {
        match parse_stage_report(b"weird") {
            VesselError::StartFailed { stage, .. } => assert_eq!(stage, "child"),
            other => panic!("unexpected: {other}"),
        }
    }
}
