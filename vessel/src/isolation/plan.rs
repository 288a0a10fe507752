//! Namespace planning.
//!
//! From the sandbox's namespace options and the container's overrides,
//! compute which namespaces the child creates anew and which it joins.
//! `network` is always taken from the sandbox; `pid`, `ipc` and `uts` are
//! per-option, each one of pod/container/node/target.

use std::collections::HashMap;
use std::path::PathBuf;

use vessel_shared::cri::{NamespaceMode, NamespaceOption};
use vessel_shared::{VesselError, VesselResult};

use crate::probe::BackendCaps;

/// Namespace kinds the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NsKind {
    Mount,
    Pid,
    Net,
    Ipc,
    Uts,
    User,
}

impl NsKind {
    /// Name under `/proc/<pid>/ns/`.
    pub fn proc_name(&self) -> &'static str {
        match self {
            NsKind::Mount => "mnt",
            NsKind::Pid => "pid",
            NsKind::Net => "net",
            NsKind::Ipc => "ipc",
            NsKind::Uts => "uts",
            NsKind::User => "user",
        }
    }
}

/// Pinned namespace references a sandbox (or target container) offers for
/// joining, as `/proc/<pid>/ns/<kind>` paths.
pub type NsRefs = HashMap<NsKind, PathBuf>;

/// The computed set of namespaces to create versus join.
#[derive(Debug, Clone, Default)]
pub struct NamespacePlan {
    pub new_user: bool,
    pub new_mount: bool,
    pub new_pid: bool,
    pub new_net: bool,
    pub new_ipc: bool,
    pub new_uts: bool,
    /// Namespaces joined before unsharing the new ones.
    pub join: Vec<(NsKind, PathBuf)>,
    /// Hostname set inside a fresh UTS namespace.
    pub hostname: Option<String>,
}

impl NamespacePlan {
    /// A plan that neither creates nor joins anything (plain host process).
    pub fn host() -> Self {
        Self::default()
    }

    /// Whether any kernel namespace work is requested.
    pub fn isolates(&self) -> bool {
        self.new_user
            || self.new_mount
            || self.new_pid
            || self.new_net
            || self.new_ipc
            || self.new_uts
            || !self.join.is_empty()
    }
}

/// Compute the plan for one container start.
///
/// `sandbox_refs` are the sandbox's pinned namespaces (empty until its
/// first member runs); `target_proc` is `/proc/<pid>` of the target
/// container when any mode is `Target`.
pub fn compute(
    caps: &BackendCaps,
    sandbox_opts: &NamespaceOption,
    container_opts: Option<&NamespaceOption>,
    sandbox_refs: &NsRefs,
    target_proc: Option<&PathBuf>,
    hostname: Option<String>,
) -> VesselResult<NamespacePlan> {
    let pid_mode = effective(container_opts, sandbox_opts, |o| o.pid);
    let ipc_mode = effective(container_opts, sandbox_opts, |o| o.ipc);
    let uts_mode = effective(container_opts, sandbox_opts, |o| o.uts);
    // Network is owned by the sandbox; container overrides do not apply.
    let net_mode = sandbox_opts.network;

    if !caps.process_isolation {
        for (kind, mode) in [("pid", pid_mode), ("ipc", ipc_mode), ("uts", uts_mode)] {
            if mode != NamespaceMode::Node {
                return Err(VesselError::Unsupported(format!(
                    "backend {} cannot provide a {} namespace (mode {:?})",
                    caps.platform_label, kind, mode
                )));
            }
        }
        // Network degrades to the host: the sandbox owns no namespace here.
        return Ok(NamespacePlan::host());
    }

    let mut plan = NamespacePlan {
        // The engine always builds a user and mount namespace on
        // namespace-capable backends; pivot_root depends on both.
        new_user: true,
        new_mount: true,
        ..NamespacePlan::default()
    };

    resolve_kind(&mut plan, NsKind::Pid, pid_mode, sandbox_refs, target_proc)?;
    resolve_kind(&mut plan, NsKind::Ipc, ipc_mode, sandbox_refs, target_proc)?;
    resolve_kind(&mut plan, NsKind::Uts, uts_mode, sandbox_refs, target_proc)?;
    resolve_kind(&mut plan, NsKind::Net, net_mode, sandbox_refs, target_proc)?;

    // Joining namespaces owned by the sandbox's user namespace requires
    // entering that user namespace first; a sibling user namespace has no
    // privilege over them.
    if !plan.join.is_empty()
        && let Some(user_ref) = sandbox_refs.get(&NsKind::User)
    {
        plan.new_user = false;
        plan.join.insert(0, (NsKind::User, user_ref.clone()));
    }

    if plan.new_uts {
        plan.hostname = hostname;
    }
    Ok(plan)
}

fn effective(
    container: Option<&NamespaceOption>,
    sandbox: &NamespaceOption,
    pick: fn(&NamespaceOption) -> NamespaceMode,
) -> NamespaceMode {
    container.map(pick).unwrap_or_else(|| pick(sandbox))
}

fn resolve_kind(
    plan: &mut NamespacePlan,
    kind: NsKind,
    mode: NamespaceMode,
    sandbox_refs: &NsRefs,
    target_proc: Option<&PathBuf>,
) -> VesselResult<()> {
    let create = |plan: &mut NamespacePlan| match kind {
        NsKind::Pid => plan.new_pid = true,
        NsKind::Ipc => plan.new_ipc = true,
        NsKind::Uts => plan.new_uts = true,
        NsKind::Net => plan.new_net = true,
        NsKind::Mount | NsKind::User => {}
    };

    match mode {
        NamespaceMode::Node => {}
        NamespaceMode::Container => create(plan),
        NamespaceMode::Pod => {
            // Join the sandbox's namespace when it exists; the first member
            // creates it (its namespace gets pinned for later joiners).
            match sandbox_refs.get(&kind) {
                Some(path) => plan.join.push((kind, path.clone())),
                None => create(plan),
            }
        }
        NamespaceMode::Target => {
            let proc_dir = target_proc.ok_or_else(|| {
                VesselError::InvalidArg(format!(
                    "{} namespace mode is target but no target container was given",
                    kind.proc_name()
                ))
            })?;
            plan.join.push((kind, proc_dir.join("ns").join(kind.proc_name())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::BackendCaps;

    const NS_CAPS: BackendCaps = BackendCaps {
        process_isolation: true,
        network_isolation: true,
        filesystem_isolation: true,
        resource_limits: true,
        true_containerization: true,
        platform_label: "linux-namespaces",
    };

    const FS_CAPS: BackendCaps = BackendCaps {
        process_isolation: false,
        network_isolation: false,
        filesystem_isolation: true,
        resource_limits: false,
        true_containerization: false,
        platform_label: "overlay-simulation",
    };

    fn opts(pid: NamespaceMode, net: NamespaceMode) -> NamespaceOption {
        NamespaceOption {
            network: net,
            pid,
            ipc: NamespaceMode::Node,
            uts: NamespaceMode::Node,
            target_id: String::new(),
        }
    }

    #[test]
    fn pod_mode_creates_when_sandbox_has_no_namespace_yet() {
        let plan = compute(
            &NS_CAPS,
            &opts(NamespaceMode::Pod, NamespaceMode::Pod),
            None,
            &NsRefs::new(),
            None,
            None,
        )
        .unwrap();
        assert!(plan.new_pid);
        assert!(plan.new_net);
        assert!(plan.join.is_empty());
        assert!(plan.new_user && plan.new_mount);
    }

    #[test]
    fn pod_mode_joins_pinned_sandbox_namespace() {
        let mut refs = NsRefs::new();
        refs.insert(NsKind::Net, PathBuf::from("/proc/42/ns/net"));
        let plan = compute(
            &NS_CAPS,
            &opts(NamespaceMode::Node, NamespaceMode::Pod),
            None,
            &refs,
            None,
            None,
        )
        .unwrap();
        assert!(!plan.new_net);
        assert_eq!(
            plan.join,
            vec![(NsKind::Net, PathBuf::from("/proc/42/ns/net"))]
        );
    }

    #[test]
    fn container_override_beats_sandbox_for_pid() {
        let container = opts(NamespaceMode::Container, NamespaceMode::Node);
        let plan = compute(
            &NS_CAPS,
            &opts(NamespaceMode::Node, NamespaceMode::Node),
            Some(&container),
            &NsRefs::new(),
            None,
            None,
        )
        .unwrap();
        assert!(plan.new_pid);
    }

    #[test]
    fn network_override_is_ignored() {
        let container = opts(NamespaceMode::Node, NamespaceMode::Container);
        let plan = compute(
            &NS_CAPS,
            &opts(NamespaceMode::Node, NamespaceMode::Node),
            Some(&container),
            &NsRefs::new(),
            None,
            None,
        )
        .unwrap();
        assert!(!plan.new_net);
    }

    #[test]
    fn target_mode_requires_target() {
        let sandbox = NamespaceOption {
            pid: NamespaceMode::Target,
            ..opts(NamespaceMode::Node, NamespaceMode::Node)
        };
        let err = compute(&NS_CAPS, &sandbox, None, &NsRefs::new(), None, None).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::InvalidArg);

        let proc_dir = PathBuf::from("/proc/7");
        let plan = compute(&NS_CAPS, &sandbox, None, &NsRefs::new(), Some(&proc_dir), None).unwrap();
        assert_eq!(
            plan.join,
            vec![(NsKind::Pid, PathBuf::from("/proc/7/ns/pid"))]
        );
    }

    #[test]
    fn filesystem_backend_rejects_namespace_requests() {
        let err = compute(
            &FS_CAPS,
            &opts(NamespaceMode::Pod, NamespaceMode::Pod),
            None,
            &NsRefs::new(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::Unsupported);
    }

    #[test]
    fn filesystem_backend_accepts_relaxed_spec() {
        let plan = compute(
            &FS_CAPS,
            &opts(NamespaceMode::Node, NamespaceMode::Pod),
            None,
            &NsRefs::new(),
            None,
            None,
        )
        .unwrap();
        assert!(!plan.isolates());
    }

    #[test]
    fn hostname_only_with_fresh_uts() {
        let sandbox = NamespaceOption {
            uts: NamespaceMode::Container,
            ..opts(NamespaceMode::Node, NamespaceMode::Node)
        };
        let plan = compute(
            &NS_CAPS,
            &sandbox,
            None,
            &NsRefs::new(),
            None,
            Some("pod-host".into()),
        )
        .unwrap();
        assert_eq!(plan.hostname.as_deref(), Some("pod-host"));

        let plan = compute(
            &NS_CAPS,
            &opts(NamespaceMode::Node, NamespaceMode::Node),
            None,
            &NsRefs::new(),
            None,
            Some("pod-host".into()),
        )
        .unwrap();
        assert!(plan.hostname.is_none());
    }
}
