//! Linux kernel feature probes.
//!
//! All checks are file reads under /proc and /sys; none require privilege.

use std::path::Path;

const NAMESPACE_KINDS: &[&str] = &["mnt", "pid", "net", "ipc", "uts", "user"];

/// All namespace kinds the isolation engine needs are exposed by the kernel.
pub fn namespaces_available() -> bool {
    NAMESPACE_KINDS
        .iter()
        .all(|kind| Path::new("/proc/self/ns").join(kind).exists())
}

/// Whether this process can create user namespaces.
///
/// Root can always create them. For other users, the Debian-style
/// `unprivileged_userns_clone` knob and the `max_user_namespaces` limit
/// both have to permit it.
pub fn user_namespaces_usable() -> bool {
    // SAFETY: geteuid is always safe to call.
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }

    if let Ok(v) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone")
        && v.trim() == "0"
    {
        return false;
    }

    if let Ok(v) = std::fs::read_to_string("/proc/sys/user/max_user_namespaces")
        && v.trim() == "0"
    {
        return false;
    }

    true
}

/// The kernel lists overlayfs as a usable filesystem.
pub fn overlayfs_available() -> bool {
    std::fs::read_to_string("/proc/filesystems")
        .map(|s| s.lines().any(|l| l.trim_end().ends_with("overlay")))
        .unwrap_or(false)
}

/// Unified cgroup v2 hierarchy is mounted.
pub fn cgroup2_available() -> bool {
    Path::new("/sys/fs/cgroup/cgroup.controllers").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_do_not_panic() {
        // Results vary by host; the probes must simply never fail.
        let _ = namespaces_available();
        let _ = user_namespaces_usable();
        let _ = overlayfs_available();
        let _ = cgroup2_available();
    }
}
