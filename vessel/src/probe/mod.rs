//! Host capability probing and backend selection.
//!
//! Probing is cheap, idempotent, and cached for the process lifetime. The
//! selector picks the highest-ranked backend whose `true_containerization`
//! flag is set, falling back to the filesystem-only backend otherwise.

use std::sync::OnceLock;

use vessel_shared::{VesselError, VesselResult};

#[cfg(target_os = "linux")]
mod linux;

/// The closed set of isolation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Kernel namespaces, UID/GID maps, pivot_root.
    Namespace,
    /// Isolation emulated with a private directory tree per container.
    OverlaySim,
    /// Directory-tree emulation for hosts without any kernel facilities,
    /// with platform path and line-ending conventions.
    Minimal,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Namespace => "namespace",
            BackendKind::OverlaySim => "overlay-sim",
            BackendKind::Minimal => "minimal",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability record attached to each detected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BackendCaps {
    pub process_isolation: bool,
    pub network_isolation: bool,
    pub filesystem_isolation: bool,
    pub resource_limits: bool,
    pub true_containerization: bool,
    pub platform_label: &'static str,
}

/// One usable backend with its capability record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backend {
    pub kind: BackendKind,
    pub caps: BackendCaps,
}

/// Ordered list of usable backends, best-ranked first.
#[derive(Debug, Clone)]
pub struct BackendSet {
    backends: Vec<Backend>,
}

impl BackendSet {
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Pick a backend.
    ///
    /// With an explicit label, that backend must be present in the detected
    /// set. Without one, the highest-ranked backend with
    /// `true_containerization` wins, else the first (filesystem) backend.
    pub fn select(&self, requested: Option<&str>) -> VesselResult<&Backend> {
        if let Some(label) = requested {
            return self
                .backends
                .iter()
                .find(|b| b.kind.label() == label)
                .ok_or_else(|| {
                    VesselError::InvalidArg(format!(
                        "unknown or unavailable runtime backend {:?} (available: {})",
                        label,
                        self.backends
                            .iter()
                            .map(|b| b.kind.label())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                });
        }

        let selected = self
            .backends
            .iter()
            .find(|b| b.caps.true_containerization)
            .or_else(|| self.backends.first())
            .ok_or_else(|| VesselError::Internal("no usable backend detected".into()))?;

        Ok(selected)
    }
}

/// Detect usable backends on this host.
///
/// The result is computed once and cached for the process lifetime.
pub fn detect() -> &'static BackendSet {
    static DETECTED: OnceLock<BackendSet> = OnceLock::new();
    DETECTED.get_or_init(|| {
        let set = probe_host();
        for backend in set.backends() {
            tracing::debug!(
                backend = %backend.kind,
                platform = backend.caps.platform_label,
                true_containerization = backend.caps.true_containerization,
                "detected backend"
            );
        }
        set
    })
}

/// Whether the kernel exposes `/proc/<pid>/setgroups`.
///
/// GID maps must not be written for unprivileged user namespaces unless this
/// is confirmed; callers surface `Unsupported` when it is not.
pub fn setgroups_confirmed() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/self/setgroups").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn probe_host() -> BackendSet {
    let mut backends = Vec::new();

    #[cfg(target_os = "linux")]
    if linux::namespaces_available() && linux::user_namespaces_usable() {
        backends.push(Backend {
            kind: BackendKind::Namespace,
            caps: BackendCaps {
                process_isolation: true,
                network_isolation: true,
                filesystem_isolation: true,
                resource_limits: linux::cgroup2_available(),
                true_containerization: true,
                platform_label: "linux-namespaces",
            },
        });
    }

    // The simulating backends need nothing beyond a writable scratch
    // directory, so they are always listed as fallbacks.
    #[cfg(unix)]
    backends.push(Backend {
        kind: BackendKind::OverlaySim,
        caps: BackendCaps {
            process_isolation: false,
            network_isolation: false,
            filesystem_isolation: true,
            resource_limits: false,
            true_containerization: false,
            platform_label: "overlay-simulation",
        },
    });

    backends.push(Backend {
        kind: BackendKind::Minimal,
        caps: BackendCaps {
            process_isolation: false,
            network_isolation: false,
            filesystem_isolation: true,
            resource_limits: false,
            true_containerization: false,
            platform_label: if cfg!(windows) {
                "minimal-windows"
            } else {
                "minimal"
            },
        },
    });

    BackendSet { backends }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_only_set() -> BackendSet {
        BackendSet {
            backends: vec![
                Backend {
                    kind: BackendKind::OverlaySim,
                    caps: BackendCaps {
                        process_isolation: false,
                        network_isolation: false,
                        filesystem_isolation: true,
                        resource_limits: false,
                        true_containerization: false,
                        platform_label: "overlay-simulation",
                    },
                },
                Backend {
                    kind: BackendKind::Minimal,
                    caps: BackendCaps {
                        process_isolation: false,
                        network_isolation: false,
                        filesystem_isolation: true,
                        resource_limits: false,
                        true_containerization: false,
                        platform_label: "minimal",
                    },
                },
            ],
        }
    }

    #[test]
    fn detect_is_cached_and_nonempty() {
        let first = detect();
        let second = detect();
        assert!(std::ptr::eq(first, second));
        assert!(!first.backends().is_empty());
    }

    #[test]
    fn detect_always_offers_a_filesystem_fallback() {
        let set = detect();
        assert!(
            set.backends()
                .iter()
                .any(|b| b.caps.filesystem_isolation && !b.caps.true_containerization)
        );
    }

    #[test]
    fn select_falls_back_without_true_containerization() {
        let set = fs_only_set();
        let backend = set.select(None).unwrap();
        assert_eq!(backend.kind, BackendKind::OverlaySim);
    }

    #[test]
    fn select_honors_explicit_label() {
        let set = fs_only_set();
        let backend = set.select(Some("minimal")).unwrap();
        assert_eq!(backend.kind, BackendKind::Minimal);
    }

    #[test]
    fn select_rejects_unknown_label() {
        let set = fs_only_set();
        let err = set.select(Some("hypervisor")).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::InvalidArg);
    }
}
