//! Pod sandbox manager.
//!
//! A sandbox groups containers sharing a subset of namespaces plus
//! DNS, ports, and hostname. Network setup happens before the first member
//! container runs; teardown happens after the last member stops. Members
//! are referenced by ID only; the supervisor owns their records.

pub mod network;

use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

pub use network::BridgeAttachment;

use crate::ids::{ContainerId, SandboxId};
use crate::isolation::cgroup;
use crate::isolation::{NamespacePlan, NsKind, NsRefs};
use crate::state::{RecordKind, StateStore};
use crate::supervisor::{ContainerSupervisor, StartContext};

/// Grace given to each member during sandbox stop.
const MEMBER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Ready,
    NotReady,
}

impl SandboxState {
    pub fn to_cri(&self) -> cri::PodSandboxState {
        match self {
            SandboxState::Ready => cri::PodSandboxState::SandboxReady,
            SandboxState::NotReady => cri::PodSandboxState::SandboxNotReady,
        }
    }
}

/// One sandbox record.
#[derive(Debug)]
pub struct SandboxRecord {
    pub id: SandboxId,
    pub config: cri::PodSandboxConfig,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub attachment: BridgeAttachment,
    /// Hierarchy-relative cgroup parent member containers nest under.
    pub cgroup_parent: String,
    /// Paths of the namespaces pinned for member joins.
    pub ns_refs: NsRefs,
    /// Open descriptors keeping the pinned namespaces alive even after the
    /// creating member exits.
    pinned: Vec<File>,
}

impl SandboxRecord {
    fn namespace_options(&self) -> cri::NamespaceOption {
        self.config
            .linux
            .as_ref()
            .map(|l| l.namespace_options.clone())
            .unwrap_or_default()
    }

    fn matches(&self, filter: &cri::PodSandboxFilter) -> bool {
        if let Some(id) = &filter.id
            && self.id.as_str() != id
        {
            return false;
        }
        if let Some(state) = filter.state
            && self.state.to_cri() != state
        {
            return false;
        }
        filter
            .label_selector
            .iter()
            .all(|(k, v)| self.config.labels.get(k) == Some(v))
    }

    fn to_cri_item(&self) -> cri::PodSandbox {
        cri::PodSandbox {
            id: self.id.to_string(),
            metadata: self.config.metadata.clone(),
            state: self.state.to_cri(),
            created_at: self.created_at.timestamp_nanos_opt().unwrap_or(0),
            labels: self.config.labels.clone(),
            annotations: self.config.annotations.clone(),
        }
    }

    fn to_cri_status(&self) -> cri::PodSandboxStatus {
        cri::PodSandboxStatus {
            id: self.id.to_string(),
            metadata: self.config.metadata.clone(),
            state: self.state.to_cri(),
            created_at: self.created_at.timestamp_nanos_opt().unwrap_or(0),
            network: cri::PodSandboxNetworkStatus::default(),
            namespace_options: self.namespace_options(),
            labels: self.config.labels.clone(),
            annotations: self.config.annotations.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SandboxSpecDoc {
    id: SandboxId,
    config: cri::PodSandboxConfig,
    created_at: DateTime<Utc>,
    #[serde(default)]
    cgroup_parent: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SandboxStatusDoc {
    state: SandboxState,
}

struct Inner {
    index: Mutex<HashMap<SandboxId, Arc<Mutex<SandboxRecord>>>>,
    store: StateStore,
    supervisor: ContainerSupervisor,
    bridge_name: String,
    /// Whether the selected backend supports kernel resource limits.
    cgroup_enabled: bool,
}

/// Thread-safe sandbox manager handle.
#[derive(Clone)]
pub struct SandboxManager {
    inner: Arc<Inner>,
}

impl SandboxManager {
    pub fn new(
        store: StateStore,
        supervisor: ContainerSupervisor,
        bridge_name: String,
        cgroup_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                index: Mutex::new(HashMap::new()),
                store,
                supervisor,
                bridge_name,
                cgroup_enabled,
            }),
        }
    }

    /// Create a sandbox and persist it `Ready`.
    ///
    /// Rejected with `AlreadyExists` when the name+namespace+attempt triple
    /// collides with a non-removed record.
    pub fn run(&self, config: cri::PodSandboxConfig) -> VesselResult<SandboxId> {
        if config.metadata.name.is_empty() || config.metadata.namespace.is_empty() {
            return Err(VesselError::InvalidArg(
                "sandbox metadata needs name and namespace".into(),
            ));
        }

        let index = self.inner.index.lock();
        for cell in index.values() {
            let record = cell.lock();
            let m = &record.config.metadata;
            if m.name == config.metadata.name
                && m.namespace == config.metadata.namespace
                && m.attempt == config.metadata.attempt
            {
                return Err(VesselError::AlreadyExists(format!(
                    "sandbox {}/{} attempt {} already exists as {}",
                    m.namespace, m.name, m.attempt, record.id
                )));
            }
        }
        drop(index);

        let id = SandboxId::generate();
        let attachment = BridgeAttachment::plan(&self.inner.bridge_name, &id, &config);
        tracing::info!(
            sandbox_id = %id,
            bridge = %attachment.bridge,
            netns = %attachment.netns,
            ports = attachment.port_mappings.len(),
            "sandbox network attachment planned"
        );

        // Initialize the cgroup parent member containers nest under. The
        // directory is best-effort (rootless hosts cannot write the
        // hierarchy); the name is recorded either way.
        let cgroup_parent = derive_cgroup_parent(&config, &id);
        if self.inner.cgroup_enabled && cgroup::v2_available() {
            match cgroup::create(&cgroup_parent) {
                Ok(path) => {
                    tracing::debug!(sandbox_id = %id, cgroup = %path.display(), "cgroup parent ready");
                }
                Err(e) => {
                    tracing::debug!(sandbox_id = %id, error = %e, "cgroup parent unavailable");
                }
            }
        }

        let record = SandboxRecord {
            id: id.clone(),
            config,
            state: SandboxState::Ready,
            created_at: Utc::now(),
            attachment,
            cgroup_parent: cgroup_parent.clone(),
            ns_refs: NsRefs::new(),
            pinned: Vec::new(),
        };

        self.inner.store.save_spec(
            RecordKind::Sandbox,
            id.as_str(),
            &SandboxSpecDoc {
                id: id.clone(),
                config: record.config.clone(),
                created_at: record.created_at,
                cgroup_parent,
            },
        )?;
        self.inner.store.save_status(
            RecordKind::Sandbox,
            id.as_str(),
            &SandboxStatusDoc {
                state: record.state,
            },
        )?;

        self.inner
            .index
            .lock()
            .insert(id.clone(), Arc::new(Mutex::new(record)));
        tracing::info!(sandbox_id = %id, "sandbox ready");
        Ok(id)
    }

    /// Stop a sandbox: quiesce new members, stop existing ones in reverse
    /// creation order, reclaim network resources. The record is kept.
    pub fn stop(&self, id: &SandboxId) -> VesselResult<()> {
        let cell = self.cell(id)?;

        // Transitioning to NotReady under the record lock quiesces creates:
        // ensure_ready() takes the same lock.
        {
            let mut record = cell.lock();
            if record.state == SandboxState::NotReady {
                return Ok(());
            }
            record.state = SandboxState::NotReady;
            self.inner.store.save_status(
                RecordKind::Sandbox,
                id.as_str(),
                &SandboxStatusDoc {
                    state: record.state,
                },
            )?;
        }

        let mut members = self.inner.supervisor.sandbox_members(id);
        members.reverse();
        for member in members {
            if let Err(e) = self.inner.supervisor.stop(&member, MEMBER_STOP_TIMEOUT) {
                tracing::warn!(sandbox_id = %id, container_id = %member, error = %e, "member stop failed");
            }
        }

        // Teardown after the last member has stopped.
        {
            let mut record = cell.lock();
            record.ns_refs.clear();
            record.pinned.clear();
        }
        tracing::info!(sandbox_id = %id, "sandbox stopped");
        Ok(())
    }

    /// Remove a sandbox. Permitted only in `NotReady` with every member in
    /// a removable state; member records are removed with it.
    pub fn remove(&self, id: &SandboxId) -> VesselResult<()> {
        let cell = self.cell(id)?;

        {
            let record = cell.lock();
            if record.state == SandboxState::Ready {
                return Err(VesselError::InUse(format!(
                    "sandbox {} is ready; stop it first",
                    id
                )));
            }
        }
        if !self.inner.supervisor.members_terminal(id) {
            return Err(VesselError::InUse(format!(
                "sandbox {} has non-terminal containers",
                id
            )));
        }

        for member in self.inner.supervisor.sandbox_members(id) {
            self.inner.supervisor.remove(&member, false)?;
        }

        // Member cgroups are gone with their records; now the parent.
        let cgroup_parent = cell.lock().cgroup_parent.clone();
        if let Err(e) = cgroup::remove(&cgroup_parent) {
            tracing::debug!(sandbox_id = %id, error = %e, "cgroup parent teardown failed");
        }

        self.inner.store.remove_record(RecordKind::Sandbox, id.as_str())?;
        self.inner.index.lock().remove(id);
        tracing::info!(sandbox_id = %id, "sandbox removed");
        Ok(())
    }

    pub fn status(&self, id: &SandboxId) -> VesselResult<cri::PodSandboxStatus> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        Ok(record.to_cri_status())
    }

    /// List sandboxes matching the filter, newest first.
    pub fn list(&self, filter: Option<&cri::PodSandboxFilter>) -> Vec<cri::PodSandbox> {
        let cells: Vec<Arc<Mutex<SandboxRecord>>> =
            self.inner.index.lock().values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let record = cell.lock();
            if filter.map(|f| record.matches(f)).unwrap_or(true) {
                out.push(record.to_cri_item());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Fail unless the sandbox exists and is `Ready`. Container creation
    /// goes through this, so `stop` quiesces it.
    pub fn ensure_ready(&self, id: &SandboxId) -> VesselResult<()> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        if record.state != SandboxState::Ready {
            return Err(VesselError::InvalidArg(format!(
                "sandbox {} is not ready",
                id
            )));
        }
        Ok(())
    }

    /// Sandbox-derived inputs for starting one member.
    pub fn start_context(&self, id: &SandboxId) -> VesselResult<StartContext> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        if record.state != SandboxState::Ready {
            return Err(VesselError::InvalidArg(format!(
                "sandbox {} is not ready",
                id
            )));
        }
        let hostname = if record.config.hostname.is_empty() {
            record.config.metadata.name.clone()
        } else {
            record.config.hostname.clone()
        };
        Ok(StartContext {
            sandbox_ns: record.namespace_options(),
            ns_refs: record.ns_refs.clone(),
            hostname: Some(hostname),
            target_proc: None,
            cgroup_parent: record.cgroup_parent.clone(),
        })
    }

    /// Pin the namespaces a member created so later members can join them.
    ///
    /// The first member of a sandbox creates the shared set; its
    /// `/proc/<pid>/ns/*` files are held open so the namespaces outlive it.
    pub fn adopt_namespaces(&self, id: &SandboxId, pid: u32, plan: &NamespacePlan) {
        let Ok(cell) = self.cell(id) else {
            return;
        };
        let mut record = cell.lock();

        let mut pin = |kind: NsKind, created: bool| {
            if !created || record.ns_refs.contains_key(&kind) {
                return;
            }
            let path = std::path::PathBuf::from(format!("/proc/{}/ns/{}", pid, kind.proc_name()));
            match File::open(&path) {
                Ok(file) => {
                    record.pinned.push(file);
                    record.ns_refs.insert(kind, path);
                }
                Err(e) => {
                    tracing::debug!(sandbox_id = %id, error = %e, "pinning namespace failed");
                }
            }
        };

        pin(NsKind::User, plan.new_user);
        pin(NsKind::Net, plan.new_net);
        pin(NsKind::Ipc, plan.new_ipc);
        pin(NsKind::Uts, plan.new_uts);
        pin(NsKind::Pid, plan.new_pid);
    }

    /// Rebuild the index from disk. Pinned namespaces do not survive a
    /// restart; records keep their persisted state.
    pub fn recover(&self) -> VesselResult<Vec<String>> {
        let mut warnings = Vec::new();
        for raw_id in self.inner.store.list_ids(RecordKind::Sandbox)? {
            let loaded = self.recover_one(&raw_id);
            if let Err(e) = loaded {
                tracing::warn!(sandbox_id = %raw_id, error = %e, "skipping sandbox during recovery");
                warnings.push(format!("sandbox {}: {}", raw_id, e));
            }
        }
        Ok(warnings)
    }

    fn recover_one(&self, raw_id: &str) -> VesselResult<()> {
        let id = SandboxId::parse(raw_id)
            .ok_or_else(|| VesselError::InvalidArg("malformed sandbox id".into()))?;
        let spec: SandboxSpecDoc = self.inner.store.load_spec(RecordKind::Sandbox, raw_id)?;
        let status: SandboxStatusDoc = self.inner.store.load_status(RecordKind::Sandbox, raw_id)?;

        let attachment = BridgeAttachment::plan(&self.inner.bridge_name, &id, &spec.config);
        let cgroup_parent = if spec.cgroup_parent.is_empty() {
            derive_cgroup_parent(&spec.config, &id)
        } else {
            spec.cgroup_parent
        };
        let record = SandboxRecord {
            id: id.clone(),
            config: spec.config,
            state: status.state,
            created_at: spec.created_at,
            attachment,
            cgroup_parent,
            ns_refs: NsRefs::new(),
            pinned: Vec::new(),
        };
        self.inner
            .index
            .lock()
            .insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Member IDs, creation-ordered (delegated to the supervisor's index).
    pub fn members(&self, id: &SandboxId) -> Vec<ContainerId> {
        self.inner.supervisor.sandbox_members(id)
    }

    pub fn contains(&self, id: &SandboxId) -> bool {
        self.inner.index.lock().contains_key(id)
    }

    fn cell(&self, id: &SandboxId) -> VesselResult<Arc<Mutex<SandboxRecord>>> {
        self.inner
            .index
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| VesselError::NotFound(format!("no such sandbox: {}", id)))
    }
}

/// The configured cgroup parent, or a per-sandbox default under `/vessel`.
fn derive_cgroup_parent(config: &cri::PodSandboxConfig, id: &SandboxId) -> String {
    let configured = config
        .linux
        .as_ref()
        .map(|l| l.cgroup_parent.as_str())
        .unwrap_or("");
    if configured.is_empty() {
        format!("/vessel/{}", id)
    } else {
        format!("/{}", configured.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_parent(parent: &str) -> cri::PodSandboxConfig {
        cri::PodSandboxConfig {
            metadata: cri::PodSandboxMetadata {
                name: "pod".into(),
                uid: "u".into(),
                namespace: "ns".into(),
                attempt: 0,
            },
            linux: Some(cri::LinuxPodSandboxConfig {
                cgroup_parent: parent.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn cgroup_parent_defaults_per_sandbox() {
        let id = SandboxId::generate();
        let derived = derive_cgroup_parent(&config_with_parent(""), &id);
        assert_eq!(derived, format!("/vessel/{}", id));
    }

    #[test]
    fn configured_cgroup_parent_is_normalized() {
        let id = SandboxId::generate();
        assert_eq!(
            derive_cgroup_parent(&config_with_parent("/kubepods/pod-1"), &id),
            "/kubepods/pod-1"
        );
        assert_eq!(
            derive_cgroup_parent(&config_with_parent("kubepods/pod-1"), &id),
            "/kubepods/pod-1"
        );
    }
}
