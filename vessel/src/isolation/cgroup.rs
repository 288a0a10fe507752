//! Cgroup v2 resource scoping.
//!
//! Sandboxes own a cgroup parent; each container gets a child cgroup under
//! it, carrying the limits from its resource spec. Creation is best-effort:
//! hosts without a writable unified hierarchy (rootless, non-Linux) run
//! without kernel-enforced limits, and the container record then carries no
//! cgroup path.
//!
//! ```text
//! /sys/fs/cgroup{parent}/          # sandbox cgroup parent
//! └── {container_id}/
//!     ├── cpu.max                  # quota/period
//!     ├── cpu.weight               # converted from cpu shares
//!     ├── memory.max
//!     ├── pids.max
//!     └── cgroup.procs             # child pid lands here
//! ```

use std::path::{Path, PathBuf};

use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

/// Base path of the cgroup v2 unified hierarchy.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Default cpu.max period in microseconds when only a quota is given.
const DEFAULT_CPU_PERIOD: u64 = 100_000;

/// Limits applied to a container cgroup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgroupLimits {
    /// `cpu.max` as (quota_usec, period_usec).
    pub cpu_max: Option<(u64, u64)>,
    /// `cpu.weight` (1..=10000).
    pub cpu_weight: Option<u64>,
    /// `memory.max` in bytes.
    pub memory_max: Option<u64>,
    /// `pids.max`.
    pub pids_max: Option<u64>,
}

impl CgroupLimits {
    /// Translate the CRI resource block. Zero and negative values mean
    /// "unset", matching the wire convention.
    pub fn from_cri(resources: Option<&cri::LinuxContainerResources>) -> Self {
        let Some(r) = resources else {
            return Self::default();
        };
        let period = if r.cpu_period > 0 {
            r.cpu_period as u64
        } else {
            DEFAULT_CPU_PERIOD
        };
        Self {
            cpu_max: (r.cpu_quota > 0).then_some((r.cpu_quota as u64, period)),
            cpu_weight: (r.cpu_shares > 0).then(|| cpu_weight_from_shares(r.cpu_shares as u64)),
            memory_max: (r.memory_limit_in_bytes > 0).then_some(r.memory_limit_in_bytes as u64),
            pids_max: (r.pids_limit > 0).then_some(r.pids_limit as u64),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Convert cgroup v1 cpu shares (2..=262144) to a v2 weight (1..=10000).
///
/// The same linear mapping the OCI runtimes use.
pub fn cpu_weight_from_shares(shares: u64) -> u64 {
    let shares = shares.clamp(2, 262_144);
    1 + ((shares - 2) * 9_999) / 262_142
}

/// Whether the unified hierarchy is present on this host.
pub fn v2_available() -> bool {
    Path::new(CGROUP_ROOT).join("cgroup.controllers").exists()
}

/// Filesystem path of a cgroup given its hierarchy-relative name.
pub fn fs_path(cgroup: &str) -> PathBuf {
    Path::new(CGROUP_ROOT).join(cgroup.trim_start_matches('/'))
}

/// Create a cgroup (and its ancestors), enabling the controllers children
/// need.
pub(crate) fn create(cgroup: &str) -> VesselResult<PathBuf> {
    if !v2_available() {
        return Err(VesselError::Unsupported(
            "cgroup v2 unified hierarchy is not mounted".into(),
        ));
    }
    let path = fs_path(cgroup);
    std::fs::create_dir_all(&path)
        .map_err(|e| VesselError::Internal(format!("creating cgroup {}: {}", path.display(), e)))?;

    // Controllers must be delegated in the parent before children can use
    // them; failures here are common rootless and non-fatal.
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::write(parent.join("cgroup.subtree_control"), "+cpu +memory +pids")
    {
        tracing::debug!(
            cgroup = %parent.display(),
            error = %e,
            "enabling cgroup controllers failed"
        );
    }
    Ok(path)
}

/// Apply limits to an existing cgroup. Individual knobs that the kernel or
/// delegation rejects are logged and skipped.
pub(crate) fn apply_limits(path: &Path, limits: &CgroupLimits) {
    if let Some((quota, period)) = limits.cpu_max {
        write_knob(path, "cpu.max", &format!("{} {}", quota, period));
    }
    if let Some(weight) = limits.cpu_weight {
        write_knob(path, "cpu.weight", &weight.to_string());
    }
    if let Some(memory) = limits.memory_max {
        write_knob(path, "memory.max", &memory.to_string());
    }
    if let Some(pids) = limits.pids_max {
        write_knob(path, "pids.max", &pids.to_string());
    }
}

/// Move a process into the cgroup.
pub(crate) fn add_process(path: &Path, pid: u32) -> VesselResult<()> {
    std::fs::write(path.join("cgroup.procs"), pid.to_string()).map_err(|e| {
        VesselError::Internal(format!(
            "adding pid {} to cgroup {}: {}",
            pid,
            path.display(),
            e
        ))
    })
}

/// Remove a cgroup directory. Gone-already is fine; a still-populated
/// cgroup is reported.
pub(crate) fn remove(cgroup: &str) -> VesselResult<()> {
    let path = fs_path(cgroup);
    match std::fs::remove_dir(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VesselError::Internal(format!(
            "removing cgroup {}: {}",
            path.display(),
            e
        ))),
    }
}

/// The v2 cgroup a process currently belongs to, hierarchy-relative.
pub(crate) fn process_cgroup(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string(format!("/proc/{}/cgroup", pid)).ok()?;
        parse_proc_cgroup(&content)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

/// Parse the unified-hierarchy line (`0::<path>`) out of /proc/<pid>/cgroup.
fn parse_proc_cgroup(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(str::to_string)
}

fn write_knob(path: &Path, knob: &str, value: &str) {
    if let Err(e) = std::fs::write(path.join(knob), value) {
        tracing::warn!(
            cgroup = %path.display(),
            knob,
            value,
            error = %e,
            "applying cgroup limit failed"
        );
    }
}
