//! Runtime facade.
//!
//! `VesselRuntime` wires the probe, VFS, image store, isolation engine,
//! supervisor, and sandbox manager together and exposes the operations the
//! CRI server and the CLI translate into. Orchestration across subsystems
//! (sandbox resolution, namespace pinning, membership bookkeeping) lives
//! here; the CRI layer stays a pure translation.

mod layout;
mod lock;
mod options;

use std::sync::Arc;
use std::time::Duration;

pub use layout::Layout;
pub use lock::RuntimeLock;
pub use options::VesselOptions;

use vessel_shared::constants::defaults;
use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

use crate::ids::{ContainerId, SandboxId};
use crate::images::{ImageRefCounts, ImageStore};
use crate::isolation::IsolationEngine;
use crate::probe::{self, Backend};
use crate::sandbox::SandboxManager;
use crate::state::StateStore;
use crate::supervisor::{ContainerSupervisor, StartContext, StreamRegistry, StreamSession};
use crate::vfs::Vfs;

/// The assembled runtime. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct VesselRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    options: VesselOptions,
    backend: Backend,
    images: Arc<ImageStore>,
    supervisor: ContainerSupervisor,
    sandboxes: SandboxManager,
    conditions: Vec<cri::RuntimeCondition>,
    _lock: RuntimeLock,
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl VesselRuntime {
    /// Build a runtime: probe the host, select the backend, open the
    /// stores, and run the crash-recovery pass. All setup completes before
    /// this returns.
    pub fn new(options: VesselOptions) -> VesselResult<Self> {
        if !options.data_dir.is_absolute() {
            return Err(VesselError::InvalidArg(format!(
                "data_dir must be an absolute path, got {}",
                options.data_dir.display()
            )));
        }

        let layout = Layout::new(options.data_dir.clone());
        layout
            .prepare()
            .map_err(|e| VesselError::Internal(format!("preparing data dir: {}", e)))?;

        let log_guard = crate::logging::init(&options);
        let lock = RuntimeLock::acquire(layout.data_dir())?;

        let backend = *probe::detect().select(options.runtime.as_deref())?;
        tracing::info!(
            backend = %backend.kind,
            platform = backend.caps.platform_label,
            true_containerization = backend.caps.true_containerization,
            "selected isolation backend"
        );

        let refcounts = ImageRefCounts::new();
        let images = Arc::new(ImageStore::open(layout.images_dir(), refcounts.clone())?);
        let store = StateStore::new(options.data_dir.clone())?;
        let vfs = Vfs::create(backend.kind, layout.trees_dir());
        let engine = IsolationEngine::new(backend);

        let supervisor = ContainerSupervisor::new(
            vfs,
            images.clone(),
            refcounts,
            store.clone(),
            engine,
            defaults::STOP_SIGNAL,
        );
        let sandboxes = SandboxManager::new(
            store,
            supervisor.clone(),
            options.bridge_name.clone(),
            backend.caps.resource_limits,
        );

        supervisor.recover()?;
        let mut warnings = supervisor.recovery_warnings();
        warnings.extend(sandboxes.recover()?);

        let mut conditions = vec![
            cri::RuntimeCondition {
                condition_type: "RuntimeReady".into(),
                status: true,
                reason: String::new(),
                message: String::new(),
            },
            cri::RuntimeCondition {
                condition_type: "NetworkReady".into(),
                status: true,
                reason: String::new(),
                message: format!("bridge {}", options.bridge_name),
            },
        ];
        for warning in warnings {
            conditions.push(cri::RuntimeCondition {
                condition_type: "RecoveryWarning".into(),
                status: false,
                reason: "RecordUnreadable".into(),
                message: warning,
            });
        }

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                options,
                backend,
                images,
                supervisor,
                sandboxes,
                conditions,
                _lock: lock,
                _log_guard: log_guard,
            }),
        })
    }

    pub fn options(&self) -> &VesselOptions {
        &self.inner.options
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub fn images(&self) -> &Arc<ImageStore> {
        &self.inner.images
    }

    pub fn supervisor(&self) -> &ContainerSupervisor {
        &self.inner.supervisor
    }

    pub fn sandboxes(&self) -> &SandboxManager {
        &self.inner.sandboxes
    }

    pub fn streams(&self) -> &StreamRegistry {
        self.inner.supervisor.streams()
    }

    pub fn version(&self) -> cri::VersionResponse {
        cri::VersionResponse {
            version: defaults::CRI_API_VERSION.to_string(),
            runtime_name: "vessel".to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_api_version: defaults::CRI_API_VERSION.to_string(),
        }
    }

    pub fn runtime_status(&self) -> cri::RuntimeStatus {
        cri::RuntimeStatus {
            conditions: self.inner.conditions.clone(),
        }
    }

    // ========================================================================
    // SANDBOX OPERATIONS
    // ========================================================================

    pub fn run_sandbox(&self, config: cri::PodSandboxConfig) -> VesselResult<String> {
        self.inner.sandboxes.run(config).map(|id| id.to_string())
    }

    pub fn stop_sandbox(&self, id: &str) -> VesselResult<()> {
        self.inner.sandboxes.stop(&parse_sandbox_id(id)?)
    }

    pub fn remove_sandbox(&self, id: &str) -> VesselResult<()> {
        self.inner.sandboxes.remove(&parse_sandbox_id(id)?)
    }

    pub fn sandbox_status(&self, id: &str) -> VesselResult<cri::PodSandboxStatus> {
        self.inner.sandboxes.status(&parse_sandbox_id(id)?)
    }

    pub fn list_sandboxes(&self, filter: Option<&cri::PodSandboxFilter>) -> Vec<cri::PodSandbox> {
        self.inner.sandboxes.list(filter)
    }

    // ========================================================================
    // CONTAINER OPERATIONS
    // ========================================================================

    /// Create a container in a sandbox. The sandbox must be `Ready`; a
    /// stopping sandbox quiesces creation.
    pub fn create_container(
        &self,
        sandbox_id: &str,
        config: cri::ContainerConfig,
    ) -> VesselResult<String> {
        let sandbox_id = parse_sandbox_id(sandbox_id)?;
        self.inner.sandboxes.ensure_ready(&sandbox_id)?;
        self.inner
            .supervisor
            .create(sandbox_id, config)
            .map(|id| id.to_string())
    }

    pub fn start_container(&self, id: &str) -> VesselResult<()> {
        let id = parse_container_id(id)?;
        let record = self.inner.supervisor.snapshot(&id)?;
        let mut ctx = self.inner.sandboxes.start_context(&record.sandbox_id)?;
        self.resolve_target(&record, &mut ctx)?;

        let outcome = self.inner.supervisor.start(&id, &ctx)?;
        self.inner
            .sandboxes
            .adopt_namespaces(&record.sandbox_id, outcome.pid, &outcome.plan);
        Ok(())
    }

    pub fn stop_container(&self, id: &str, timeout_s: i64) -> VesselResult<()> {
        let timeout = Duration::from_secs(timeout_s.max(0) as u64);
        self.inner.supervisor.stop(&parse_container_id(id)?, timeout)
    }

    pub fn remove_container(&self, id: &str, force: bool) -> VesselResult<()> {
        self.inner
            .supervisor
            .remove(&parse_container_id(id)?, force)
            .map(|_| ())
    }

    pub fn container_status(&self, id: &str) -> VesselResult<cri::ContainerStatus> {
        self.inner.supervisor.status(&parse_container_id(id)?)
    }

    pub fn list_containers(&self, filter: Option<&cri::ContainerFilter>) -> Vec<cri::Container> {
        self.inner.supervisor.list(filter)
    }

    pub fn container_stats(&self, id: &str) -> VesselResult<cri::ContainerStats> {
        self.inner.supervisor.stats(&parse_container_id(id)?)
    }

    pub fn list_container_stats(
        &self,
        filter: Option<&cri::ContainerStatsFilter>,
    ) -> Vec<cri::ContainerStats> {
        self.inner.supervisor.list_stats(filter)
    }

    pub fn exec_sync(
        &self,
        id: &str,
        cmd: &[String],
        timeout_s: i64,
    ) -> VesselResult<cri::ExecSyncResponse> {
        // Zero means no client deadline; bound it anyway so a wedged exec
        // cannot pin a worker forever.
        let timeout = if timeout_s <= 0 {
            Duration::from_secs(24 * 60 * 60)
        } else {
            Duration::from_secs(timeout_s as u64)
        };
        self.inner
            .supervisor
            .exec_sync(&parse_container_id(id)?, cmd, timeout)
    }

    pub fn exec(&self, req: &cri::ExecRequest) -> VesselResult<StreamSession> {
        self.inner.supervisor.exec(req)
    }

    pub fn attach(&self, req: &cri::AttachRequest) -> VesselResult<StreamSession> {
        self.inner.supervisor.attach(req)
    }

    pub fn port_forward(&self, req: &cri::PortForwardRequest) -> VesselResult<StreamSession> {
        let sandbox_id = parse_sandbox_id(&req.pod_sandbox_id)?;
        if !self.inner.sandboxes.contains(&sandbox_id) {
            return Err(VesselError::NotFound(format!(
                "no such sandbox: {}",
                req.pod_sandbox_id
            )));
        }
        Ok(self
            .streams()
            .register(crate::supervisor::StreamKind::PortForward {
                sandbox_id: sandbox_id.to_string(),
                ports: req.port.clone(),
            }))
    }

    /// Tail a container log from a byte offset.
    pub fn read_log(
        &self,
        id: &str,
        offset: u64,
        max_bytes: usize,
    ) -> VesselResult<(Vec<u8>, u64)> {
        self.inner
            .supervisor
            .read_log(&parse_container_id(id)?, offset, max_bytes)
    }

    /// Resolve `Target` namespace modes to the target's `/proc` directory.
    fn resolve_target(
        &self,
        record: &crate::supervisor::ContainerRecord,
        ctx: &mut StartContext,
    ) -> VesselResult<()> {
        let override_ns = record
            .spec
            .security
            .as_ref()
            .and_then(|s| s.namespace_options.as_ref());
        let effective = override_ns.unwrap_or(&ctx.sandbox_ns);

        let uses_target = [effective.pid, effective.ipc, effective.uts]
            .into_iter()
            .any(|m| m == cri::NamespaceMode::Target);
        if !uses_target {
            return Ok(());
        }

        let target_id = &effective.target_id;
        if target_id.is_empty() {
            return Err(VesselError::InvalidArg(
                "namespace mode is target but target_id is empty".into(),
            ));
        }
        let target = parse_container_id(target_id)?;
        ctx.target_proc = Some(self.inner.supervisor.proc_dir(&target)?);
        Ok(())
    }
}

impl std::fmt::Debug for VesselRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VesselRuntime")
            .field("data_dir", &self.inner.options.data_dir)
            .field("backend", &self.inner.backend.kind)
            .finish()
    }
}

fn parse_container_id(raw: &str) -> VesselResult<ContainerId> {
    ContainerId::parse(raw)
        .ok_or_else(|| VesselError::NotFound(format!("no such container: {}", raw)))
}

fn parse_sandbox_id(raw: &str) -> VesselResult<SandboxId> {
    SandboxId::parse(raw).ok_or_else(|| VesselError::NotFound(format!("no such sandbox: {}", raw)))
}

// Compile-time assertion: the runtime must be shareable across the CRI
// server's worker tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<VesselRuntime>;
};
