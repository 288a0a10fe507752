//! Synchronous in-container command execution.
//!
//! `exec_sync` runs a process inside the existing isolation of a running
//! container: on the namespace backend the helper enters the container's
//! namespaces before exec; on the simulating backends it runs rooted in the
//! container tree with the container environment.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use vessel_shared::{VesselError, VesselResult};

use crate::probe::BackendKind;
use crate::vfs::path::confine;

#[derive(Debug)]
pub(crate) struct ExecSyncOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub(crate) struct ExecTarget<'a> {
    pub backend: BackendKind,
    /// PID of the container init (namespace backend).
    pub pid: Option<u32>,
    /// Host path of the container root.
    pub root: &'a Path,
    pub working_dir: &'a str,
    pub env: &'a [(String, String)],
}

pub(crate) fn run_sync(
    target: &ExecTarget<'_>,
    cmd: &[String],
    timeout: Duration,
) -> VesselResult<ExecSyncOutput> {
    if cmd.is_empty() {
        return Err(VesselError::InvalidArg("empty exec command".into()));
    }

    let mut command = Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let has_path = target.env.iter().any(|(k, _)| k == "PATH");
    if !has_path {
        command.env(
            "PATH",
            std::env::var("PATH")
                .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
        );
    }
    for (key, value) in target.env {
        command.env(key, value);
    }

    match target.backend {
        BackendKind::Namespace => {
            #[cfg(target_os = "linux")]
            {
                let pid = target.pid.ok_or_else(|| {
                    VesselError::Internal("exec target has no pid".to_string())
                })?;
                enter_namespaces(&mut command, pid, target.working_dir)?;
            }
            #[cfg(not(target_os = "linux"))]
            {
                return Err(VesselError::Unsupported(
                    "namespace exec is linux-only".into(),
                ));
            }
        }
        BackendKind::OverlaySim | BackendKind::Minimal => {
            let workdir = confine(target.root, target.working_dir)?;
            command.current_dir(workdir);
        }
    }

    let mut child = command
        .spawn()
        .map_err(|e| VesselError::Internal(format!("exec spawn {}: {}", cmd[0], e)))?;

    // Drain stdio on threads so a chatty child cannot deadlock on a full
    // pipe while we wait.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_thread = std::thread::spawn(move || read_all(stdout));
    let err_thread = std::thread::spawn(move || read_all(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child
            .try_wait()
            .map_err(|e| VesselError::Internal(format!("exec wait: {}", e)))?
        {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = out_thread.join();
                let _ = err_thread.join();
                return Err(VesselError::Timeout(format!(
                    "exec of {} exceeded {:?}",
                    cmd[0], timeout
                )));
            }
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    };

    let stdout = out_thread.join().unwrap_or_default();
    let stderr = err_thread.join().unwrap_or_default();

    let exit_code = {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            status
                .code()
                .or(status.signal().map(|s| 128 + s))
                .unwrap_or(-1)
        }
        #[cfg(not(unix))]
        {
            status.code().unwrap_or(-1)
        }
    };

    Ok(ExecSyncOutput {
        exit_code,
        stdout,
        stderr,
    })
}

fn read_all(stream: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf);
    }
    buf
}

/// Configure the command to enter the namespaces of `pid` before exec.
#[cfg(target_os = "linux")]
fn enter_namespaces(command: &mut Command, pid: u32, working_dir: &str) -> VesselResult<()> {
    use std::os::fd::IntoRawFd;
    use std::os::unix::process::CommandExt;

    // Open all namespace fds in the parent; the pre_exec hook must not
    // allocate or open files.
    let mut fds = Vec::new();
    for kind in ["user", "mnt", "pid", "net", "ipc", "uts"] {
        let path = format!("/proc/{}/ns/{}", pid, kind);
        match std::fs::File::open(&path) {
            Ok(f) => fds.push(f.into_raw_fd()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VesselError::Internal(format!("opening {}: {}", path, e)));
            }
        }
    }
    let workdir = std::ffi::CString::new(working_dir.to_string())
        .map_err(|_| VesselError::InvalidArg("NUL in working dir".into()))?;

    // SAFETY: the hook only issues setns/chdir/close syscalls.
    unsafe {
        command.pre_exec(move || {
            for fd in &fds {
                if libc::setns(*fd, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            for fd in &fds {
                libc::close(*fd);
            }
            if libc::chdir(workdir.as_ptr()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target<'a>(root: &'a Path) -> ExecTarget<'a> {
        ExecTarget {
            backend: BackendKind::OverlaySim,
            pid: None,
            root,
            working_dir: "/",
            env: &[],
        }
    }

    #[cfg(unix)]
    #[test]
    fn exec_sync_captures_output_and_code() {
        let tmp = TempDir::new().unwrap();
        let out = run_sync(
            &target(tmp.path()),
            &["sh".into(), "-c".into(), "echo out; echo err >&2; exit 4".into()],
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(out.exit_code, 4);
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
    }

    #[cfg(unix)]
    #[test]
    fn exec_sync_times_out() {
        let tmp = TempDir::new().unwrap();
        let started = Instant::now();
        let err = run_sync(
            &target(tmp.path()),
            &["sleep".into(), "30".into()],
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn empty_command_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = run_sync(&target(tmp.path()), &[], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::InvalidArg);
    }
}
