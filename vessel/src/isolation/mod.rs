//! Isolation engine.
//!
//! Turns a container specification plus a mounted VFS root into a running
//! child process at the requested isolation level. On namespace-capable
//! backends the child is cloned directly into its namespaces, UID/GID maps
//! are written from the parent side, and the child pivots into the
//! container root before exec. On the simulating backends the engine
//! degrades to a supervised host process rooted in the container tree.

pub mod caps;
pub mod cgroup;
pub mod idmap;
pub mod plan;

#[cfg(target_os = "linux")]
mod child;
#[cfg(target_os = "linux")]
mod clone;
mod process;

use std::io::Read;
use std::path::PathBuf;

pub use caps::{CAPABILITY_UNIVERSE, CapabilityPlan, DEFAULT_CAPABILITIES};
pub use cgroup::CgroupLimits;
pub use idmap::{IdMapConfig, IdMapEntry};
pub use plan::{NamespacePlan, NsKind, NsRefs};

use vessel_shared::{VesselError, VesselResult};

use crate::ids::ContainerId;
use crate::probe::Backend;

/// Extra filesystem declared by the container spec, applied by the child
/// before pivoting.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub kind: MountKind,
    /// Host source for bind mounts.
    pub source: Option<PathBuf>,
    /// Absolute container destination.
    pub target: String,
    pub readonly: bool,
    pub propagation: vessel_shared::cri::MountPropagation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Tmpfs,
    Proc,
}

/// Everything the engine needs to start one container process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub container_id: ContainerId,
    /// VFS-resolved container root on the host.
    pub rootfs: PathBuf,
    /// argv; must be non-empty.
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Absolute container working directory.
    pub working_dir: String,
    pub plan: NamespacePlan,
    pub idmap: IdMapConfig,
    pub caps: CapabilityPlan,
    pub no_new_privs: bool,
    pub supplemental_groups: Vec<u32>,
    pub mounts: Vec<MountSpec>,
}

/// Exit status of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusInfo {
    pub exit_code: i32,
    pub signal: Option<i32>,
}

/// Handle the reaper polls for child exit.
#[derive(Debug)]
pub enum WaitHandle {
    /// Child spawned through `std::process::Command`.
    Child(std::process::Child),
    /// Raw PID from the namespace clone path.
    Pid(u32),
}

impl WaitHandle {
    /// Non-blocking exit check. `Ok(None)` while the child runs.
    pub fn try_wait(&mut self) -> VesselResult<Option<ExitStatusInfo>> {
        match self {
            WaitHandle::Child(child) => {
                let status = child
                    .try_wait()
                    .map_err(|e| VesselError::Internal(format!("try_wait: {}", e)))?;
                Ok(status.map(exit_info_from_status))
            }
            WaitHandle::Pid(pid) => try_wait_pid(*pid),
        }
    }

    /// Signal the child. `sig` is a POSIX signal number.
    pub fn kill(&self, sig: i32) -> VesselResult<()> {
        let pid = match self {
            WaitHandle::Child(child) => child.id(),
            WaitHandle::Pid(pid) => *pid,
        };
        signal_pid(pid, sig)
    }
}

/// A started container process with its captured stdio.
pub struct Launched {
    pub pid: u32,
    pub stdout: Option<Box<dyn Read + Send>>,
    pub stderr: Option<Box<dyn Read + Send>>,
    pub wait: WaitHandle,
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched").field("pid", &self.pid).finish()
    }
}

/// The engine itself: stateless beyond the selected backend.
#[derive(Debug, Clone, Copy)]
pub struct IsolationEngine {
    backend: Backend,
}

impl IsolationEngine {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Start the container process described by `spec`.
    ///
    /// Pre-exec failures surface as `StartFailed{stage}`; the caller keeps
    /// the container in `Created`.
    pub fn launch(&self, spec: LaunchSpec) -> VesselResult<Launched> {
        if spec.command.is_empty() {
            return Err(VesselError::InvalidArg("empty container command".into()));
        }
        spec.idmap.validate()?;
        if !spec.rootfs.is_dir() {
            return Err(VesselError::start_failed(
                "rootfs",
                format!("container root missing: {}", spec.rootfs.display()),
            ));
        }

        if spec.plan.isolates() {
            #[cfg(target_os = "linux")]
            {
                if spec.plan.new_user && !crate::probe::setgroups_confirmed() {
                    // Pre-user-namespace kernels have implementation-defined
                    // setgroups semantics; refuse rather than guess.
                    return Err(VesselError::Unsupported(
                        "kernel does not expose /proc/<pid>/setgroups; \
                         user-namespace GID mapping cannot be confirmed"
                            .into(),
                    ));
                }
                clone::spawn(&spec)
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(VesselError::Unsupported(format!(
                    "namespace isolation is unavailable on {}",
                    std::env::consts::OS
                )))
            }
        } else {
            process::spawn(&spec)
        }
    }
}

fn exit_info_from_status(status: std::process::ExitStatus) -> ExitStatusInfo {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitStatusInfo {
                exit_code: 128 + sig,
                signal: Some(sig),
            };
        }
    }
    ExitStatusInfo {
        exit_code: status.code().unwrap_or(-1),
        signal: None,
    }
}

#[cfg(unix)]
fn try_wait_pid(pid: u32) -> VesselResult<Option<ExitStatusInfo>> {
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::Pid;

    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitStatusInfo {
            exit_code: code,
            signal: None,
        })),
        Ok(WaitStatus::Signaled(_, sig, _)) => Ok(Some(ExitStatusInfo {
            exit_code: 128 + sig as i32,
            signal: Some(sig as i32),
        })),
        Ok(_) => Ok(None),
        Err(nix::errno::Errno::ECHILD) => Err(VesselError::Internal(format!(
            "pid {} is not a child of this process",
            pid
        ))),
        Err(e) => Err(VesselError::Internal(format!("waitpid {}: {}", pid, e))),
    }
}

#[cfg(not(unix))]
fn try_wait_pid(_pid: u32) -> VesselResult<Option<ExitStatusInfo>> {
    Err(VesselError::Unsupported(
        "raw pid waiting is unix-only".into(),
    ))
}

#[cfg(unix)]
pub(crate) fn signal_pid(pid: u32, sig: i32) -> VesselResult<()> {
    // SAFETY: kill with a validated pid/signal pair.
    let rc = unsafe { libc::kill(pid as i32, sig) };
    if rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
        // Already-gone children are fine; the reaper owns the exit status.
        Ok(())
    } else {
        Err(VesselError::Internal(format!(
            "kill({}, {}): {}",
            pid,
            sig,
            std::io::Error::last_os_error()
        )))
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_pid(_pid: u32, _sig: i32) -> VesselResult<()> {
    Err(VesselError::Unsupported("signals are unix-only".into()))
}
