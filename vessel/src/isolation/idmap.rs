//! User-namespace UID/GID mappings.
//!
//! A mapping is a list of `(container_id, host_id, count)` triples. The
//! union of entries must be a function on both sides: neither the container
//! ranges nor the host ranges may overlap.

use serde::{Deserialize, Serialize};
use vessel_shared::constants::defaults;
use vessel_shared::{VesselError, VesselResult};

/// One mapping range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub container_id: u32,
    pub host_id: u32,
    pub count: u32,
}

impl IdMapEntry {
    pub const fn new(container_id: u32, host_id: u32, count: u32) -> Self {
        Self {
            container_id,
            host_id,
            count,
        }
    }
}

/// Complete UID/GID mapping configuration for a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapConfig {
    pub uid_map: Vec<IdMapEntry>,
    pub gid_map: Vec<IdMapEntry>,
    /// Permit `setgroups` inside the namespace. When false (the default),
    /// `setgroups` is denied before the GID map is written.
    pub allow_setgroups: bool,
    /// UID/GID the entrypoint runs as, in container terms.
    pub run_as: (u32, u32),
}

impl IdMapConfig {
    /// Rootful default: container root maps to the caller, and a 65536-wide
    /// range starting at container uid 1000 maps from caller+1. The
    /// entrypoint runs as container uid 1000.
    pub fn rootful(caller_uid: u32, caller_gid: u32) -> Self {
        let uid_map = vec![
            IdMapEntry::new(0, caller_uid, 1),
            IdMapEntry::new(1000, caller_uid + 1, defaults::IDMAP_RANGE),
        ];
        let gid_map = vec![
            IdMapEntry::new(0, caller_gid, 1),
            IdMapEntry::new(1000, caller_gid + 1, defaults::IDMAP_RANGE),
        ];
        Self {
            uid_map,
            gid_map,
            allow_setgroups: false,
            run_as: (1000, 1000),
        }
    }

    /// Rootless: the caller's own UID and GID map one-to-one; the
    /// entrypoint runs as the same UID inside.
    pub fn rootless(caller_uid: u32, caller_gid: u32) -> Self {
        Self {
            uid_map: vec![IdMapEntry::new(caller_uid, caller_uid, 1)],
            gid_map: vec![IdMapEntry::new(caller_gid, caller_gid, 1)],
            allow_setgroups: false,
            run_as: (caller_uid, caller_gid),
        }
    }

    /// Pick the canonical mode for the calling process.
    pub fn for_caller() -> Self {
        let (uid, gid) = caller_ids();
        if uid == 0 {
            Self::rootful(uid, gid)
        } else {
            Self::rootless(uid, gid)
        }
    }

    /// Validate that both maps are functions on both sides.
    pub fn validate(&self) -> VesselResult<()> {
        validate_entries("uid", &self.uid_map)?;
        validate_entries("gid", &self.gid_map)?;
        Ok(())
    }

    /// Render one map in `/proc/<pid>/{uid,gid}_map` syntax.
    pub fn render(entries: &[IdMapEntry]) -> String {
        let mut out = String::new();
        for e in entries {
            out.push_str(&format!("{} {} {}\n", e.container_id, e.host_id, e.count));
        }
        out
    }
}

fn caller_ids() -> (u32, u32) {
    #[cfg(unix)]
    {
        // SAFETY: geteuid/getegid are always safe to call.
        unsafe { (libc::geteuid(), libc::getegid()) }
    }
    #[cfg(not(unix))]
    {
        (0, 0)
    }
}

fn validate_entries(which: &str, entries: &[IdMapEntry]) -> VesselResult<()> {
    if entries.is_empty() {
        return Err(VesselError::InvalidArg(format!("empty {} map", which)));
    }
    for e in entries {
        if e.count == 0 {
            return Err(VesselError::InvalidArg(format!(
                "{} map entry with zero count",
                which
            )));
        }
        if e.container_id.checked_add(e.count - 1).is_none()
            || e.host_id.checked_add(e.count - 1).is_none()
        {
            return Err(VesselError::InvalidArg(format!(
                "{} map entry overflows the id space",
                which
            )));
        }
    }

    for side in [side_ranges(entries, true), side_ranges(entries, false)] {
        let mut ranges = side;
        ranges.sort_by_key(|r| r.0);
        for pair in ranges.windows(2) {
            let (a_start, a_count) = pair[0];
            let (b_start, _) = pair[1];
            if b_start < a_start + a_count as u64 {
                return Err(VesselError::InvalidArg(format!(
                    "overlapping {} map ranges",
                    which
                )));
            }
        }
    }
    Ok(())
}

fn side_ranges(entries: &[IdMapEntry], container_side: bool) -> Vec<(u64, u32)> {
    entries
        .iter()
        .map(|e| {
            let start = if container_side {
                e.container_id
            } else {
                e.host_id
            };
            (start as u64, e.count)
        })
        .collect()
}

/// Write the child's mapping files from the parent side.
///
/// `setgroups` is denied before the GID map is written unless the
/// configuration explicitly permits it; the kernel requires this order for
/// unprivileged namespaces.
#[cfg(target_os = "linux")]
pub(crate) fn write_maps(pid: u32, config: &IdMapConfig) -> VesselResult<()> {
    let setgroups_path = format!("/proc/{}/setgroups", pid);
    if !config.allow_setgroups {
        std::fs::write(&setgroups_path, "deny").map_err(|e| {
            VesselError::start_failed("setgroups", format!("{}: {}", setgroups_path, e))
        })?;
    }

    let gid_path = format!("/proc/{}/gid_map", pid);
    std::fs::write(&gid_path, IdMapConfig::render(&config.gid_map))
        .map_err(|e| VesselError::start_failed("gid_map", format!("{}: {}", gid_path, e)))?;

    let uid_path = format!("/proc/{}/uid_map", pid);
    std::fs::write(&uid_path, IdMapConfig::render(&config.uid_map))
        .map_err(|e| VesselError::start_failed("uid_map", format!("{}: {}", uid_path, e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_shared::ErrorKind;

    #[test]
    fn rootful_map_shape() {
        let config = IdMapConfig::rootful(1000, 1000);
        assert_eq!(config.uid_map[0], IdMapEntry::new(0, 1000, 1));
        assert_eq!(
            config.uid_map[1],
            IdMapEntry::new(1000, 1001, defaults::IDMAP_RANGE)
        );
        assert_eq!(config.run_as, (1000, 1000));
        config.validate().unwrap();
    }

    #[test]
    fn rootless_map_is_identity() {
        let config = IdMapConfig::rootless(1234, 1234);
        assert_eq!(config.uid_map, vec![IdMapEntry::new(1234, 1234, 1)]);
        assert_eq!(config.run_as, (1234, 1234));
        config.validate().unwrap();
    }

    #[test]
    fn overlapping_container_ranges_rejected() {
        let config = IdMapConfig {
            uid_map: vec![IdMapEntry::new(0, 1000, 10), IdMapEntry::new(5, 2000, 10)],
            gid_map: vec![IdMapEntry::new(0, 1000, 1)],
            allow_setgroups: false,
            run_as: (0, 0),
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn overlapping_host_ranges_rejected() {
        let config = IdMapConfig {
            uid_map: vec![IdMapEntry::new(0, 1000, 10), IdMapEntry::new(100, 1005, 10)],
            gid_map: vec![IdMapEntry::new(0, 1000, 1)],
            allow_setgroups: false,
            run_as: (0, 0),
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn zero_count_rejected() {
        let config = IdMapConfig {
            uid_map: vec![IdMapEntry::new(0, 1000, 0)],
            gid_map: vec![IdMapEntry::new(0, 1000, 1)],
            allow_setgroups: false,
            run_as: (0, 0),
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn render_matches_proc_syntax() {
        let rendered = IdMapConfig::render(&[
            IdMapEntry::new(0, 1000, 1),
            IdMapEntry::new(1000, 1001, 65536),
        ]);
        assert_eq!(rendered, "0 1000 1\n1000 1001 65536\n");
    }
}
