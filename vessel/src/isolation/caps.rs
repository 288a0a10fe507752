//! Capability set composition.
//!
//! A container's capability plan is two orthogonal name sets: additions and
//! drops. Composition is drop-first-then-add with drop winning on conflict,
//! on top of a conventional default set. The special name `ALL` expands to
//! the full universe.

use std::collections::BTreeSet;

use vessel_shared::{VesselError, VesselResult};

/// The 41-entry capability universe, in kernel bit order.
pub const CAPABILITY_UNIVERSE: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// Capabilities containers keep by default (the conventional runtime set).
pub const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_RAW",
    "CAP_SYS_CHROOT",
    "CAP_MKNOD",
    "CAP_AUDIT_WRITE",
    "CAP_SETFCAP",
];

/// Validated add/drop capability sets.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CapabilityPlan {
    add: Vec<String>,
    drop: Vec<String>,
}

impl CapabilityPlan {
    /// Build a plan from raw name lists.
    ///
    /// Names are accepted with or without the `CAP_` prefix, case-insensitive;
    /// unknown names (other than `ALL`) are `InvalidArg`.
    pub fn new(add: &[String], drop: &[String]) -> VesselResult<Self> {
        Ok(Self {
            add: normalize(add)?,
            drop: normalize(drop)?,
        })
    }

    /// The capability names the child keeps: everything else is dropped.
    ///
    /// Drops are applied first, then additions, and a name present in both
    /// sets stays dropped.
    pub fn effective(&self) -> Vec<String> {
        let mut kept: BTreeSet<String> = DEFAULT_CAPABILITIES
            .iter()
            .map(|s| s.to_string())
            .collect();

        apply(&mut kept, &self.drop, false);
        apply(&mut kept, &self.add, true);
        // Drop wins on conflict.
        apply(&mut kept, &self.drop, false);

        // Stable kernel-bit ordering.
        CAPABILITY_UNIVERSE
            .iter()
            .filter(|name| kept.contains(**name))
            .map(|s| s.to_string())
            .collect()
    }
}

fn apply(kept: &mut BTreeSet<String>, names: &[String], insert: bool) {
    for name in names {
        if name == "ALL" {
            if insert {
                kept.extend(CAPABILITY_UNIVERSE.iter().map(|s| s.to_string()));
            } else {
                kept.clear();
            }
        } else if insert {
            kept.insert(name.clone());
        } else {
            kept.remove(name);
        }
    }
}

fn normalize(names: &[String]) -> VesselResult<Vec<String>> {
    let mut out = Vec::with_capacity(names.len());
    for raw in names {
        let upper = raw.to_uppercase();
        if upper == "ALL" {
            out.push(upper);
            continue;
        }
        let canonical = if upper.starts_with("CAP_") {
            upper
        } else {
            format!("CAP_{}", upper)
        };
        if !CAPABILITY_UNIVERSE.contains(&canonical.as_str()) {
            return Err(VesselError::InvalidArg(format!(
                "unknown capability: {}",
                raw
            )));
        }
        out.push(canonical);
    }
    Ok(out)
}
