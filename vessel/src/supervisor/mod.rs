//! Container supervisor.
//!
//! Exclusively owns container records from creation through removal:
//! lifecycle transitions, stdio capture, exit reaping, stats, exec, and
//! crash recovery. Operations on the same container serialize on its
//! per-record lock; operations on distinct containers are independent.

mod exec;
mod logs;
mod reaper;
pub mod record;
pub mod state;
mod stats;
pub mod streams;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

pub use record::{ContainerRecord, ContainerSpec};
pub use state::ContainerState;
pub use streams::{StreamKind, StreamRegistry, StreamSession};

use crate::ids::{ContainerId, SandboxId};
use crate::images::{ImageRefCounts, ImageStore};
use crate::isolation::{
    CapabilityPlan, CgroupLimits, IdMapConfig, IsolationEngine, LaunchSpec, MountKind, MountSpec,
    NamespacePlan, NsRefs, cgroup, plan,
};
use crate::state::{RecordKind, StateStore};
use crate::vfs::{ContainerFs, Vfs};
use record::{ContainerSpecDoc, ContainerStatusDoc};
use reaper::{ExitSlot, Reaper, Watched};

/// How long a forced removal waits for the implicit stop.
const FORCE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the reaper after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(60);

/// Sandbox-derived inputs for one container start.
#[derive(Debug, Clone, Default)]
pub struct StartContext {
    pub sandbox_ns: cri::NamespaceOption,
    /// Namespaces the sandbox has pinned for joining.
    pub ns_refs: NsRefs,
    pub hostname: Option<String>,
    /// `/proc/<pid>` of the target container for `Target` modes.
    pub target_proc: Option<PathBuf>,
    /// The sandbox's cgroup parent; the container cgroup nests under it.
    pub cgroup_parent: String,
}

/// What a successful start hands back for namespace pinning.
#[derive(Debug)]
pub struct StartOutcome {
    pub pid: u32,
    pub plan: NamespacePlan,
}

struct Cell {
    record: Mutex<ContainerRecord>,
    exit: Arc<ExitSlot>,
}

struct Inner {
    index: Mutex<HashMap<ContainerId, Arc<Cell>>>,
    vfs: Vfs,
    images: Arc<ImageStore>,
    refcounts: ImageRefCounts,
    store: StateStore,
    engine: IsolationEngine,
    streams: StreamRegistry,
    stop_signal: i32,
    recovery_warnings: Mutex<Vec<String>>,
}

impl Inner {
    fn cell(&self, id: &ContainerId) -> VesselResult<Arc<Cell>> {
        self.index
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| VesselError::NotFound(format!("no such container: {}", id)))
    }

    fn persist_status(&self, record: &ContainerRecord) {
        if let Err(e) = self
            .store
            .save_status(RecordKind::Container, record.id.as_str(), &record.status_doc())
        {
            tracing::warn!(container_id = %record.id, error = %e, "persisting container status failed");
        }
    }

    /// Reaper callback: records the exit status and finish time.
    fn on_exit(&self, id: &ContainerId, info: crate::isolation::ExitStatusInfo) {
        let Ok(cell) = self.cell(id) else {
            return;
        };
        let mut record = cell.record.lock();
        if record.state == ContainerState::Exited {
            return;
        }
        // Running → Exited on reap; Unknown → Exited once a recovered
        // impostor or orphan pid goes away.
        if let Err(e) = record.state.transition_to(ContainerState::Exited) {
            tracing::warn!(container_id = %id, error = %e, "exit on non-running container");
            return;
        }
        record.exit_code = Some(info.exit_code);
        record.exit_signal = info.signal;
        record.finished_at = Some(Utc::now());
        record.reason = if info.exit_code == 0 {
            "Completed".into()
        } else {
            "Error".into()
        };
        self.persist_status(&record);
        drop(record);

        let _ = self.vfs.unmount(id);
    }
}

/// Thread-safe supervisor handle; clones share state.
#[derive(Clone)]
pub struct ContainerSupervisor {
    inner: Arc<Inner>,
    reaper: Arc<Reaper>,
}

impl ContainerSupervisor {
    pub fn new(
        vfs: Vfs,
        images: Arc<ImageStore>,
        refcounts: ImageRefCounts,
        store: StateStore,
        engine: IsolationEngine,
        stop_signal: i32,
    ) -> Self {
        let inner = Arc::new(Inner {
            index: Mutex::new(HashMap::new()),
            vfs,
            images,
            refcounts,
            store,
            engine,
            streams: StreamRegistry::default(),
            stop_signal,
            recovery_warnings: Mutex::new(Vec::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let reaper = Reaper::spawn(Box::new(move |id, info| {
            if let Some(inner) = weak.upgrade() {
                inner.on_exit(id, info);
            }
        }));

        Self {
            inner,
            reaper: Arc::new(reaper),
        }
    }

    /// Allocate an ID and persist the record in `Created`.
    pub fn create(
        &self,
        sandbox_id: SandboxId,
        config: cri::ContainerConfig,
    ) -> VesselResult<ContainerId> {
        let image = self.inner.images.get(&config.image.image)?;
        let spec = ContainerSpec::from_config(config, image.digest.clone())?;

        // A spec that explicitly demands namespaces fails here, before any
        // resources are acquired, when the backend cannot provide them.
        if !self.inner.engine.backend().caps.process_isolation
            && let Some(ns) = spec.security.as_ref().and_then(|s| s.namespace_options.as_ref())
        {
            for (kind, mode) in [("pid", ns.pid), ("ipc", ns.ipc), ("uts", ns.uts)] {
                if mode != cri::NamespaceMode::Node {
                    return Err(VesselError::Unsupported(format!(
                        "backend {} cannot provide a {} namespace",
                        self.inner.engine.backend().caps.platform_label, kind
                    )));
                }
            }
        }

        let id = ContainerId::generate();
        let log_path = self.inner.store.log_path(id.as_str());
        let record = ContainerRecord::new(id.clone(), sandbox_id, spec, log_path);

        self.inner.refcounts.acquire(&image.digest);
        let persisted = self
            .inner
            .store
            .save_spec(RecordKind::Container, id.as_str(), &record.spec_doc())
            .and_then(|_| {
                self.inner
                    .store
                    .save_status(RecordKind::Container, id.as_str(), &record.status_doc())
            });
        if let Err(e) = persisted {
            self.inner.refcounts.release(&image.digest);
            return Err(e);
        }

        self.inner.index.lock().insert(
            id.clone(),
            Arc::new(Cell {
                record: Mutex::new(record),
                exit: ExitSlot::new(),
            }),
        );

        tracing::info!(container_id = %id, image = %image.digest, "created container");
        Ok(id)
    }

    /// Start the container's entrypoint. Fails unless the state is
    /// `Created`; pre-exec failures leave the record in `Created`.
    pub fn start(&self, id: &ContainerId, ctx: &StartContext) -> VesselResult<StartOutcome> {
        let cell = self.inner.cell(id)?;
        let mut record = cell.record.lock();

        if !record.state.can_start() {
            return Err(VesselError::InvalidArg(format!(
                "container {} is {}; start requires created",
                id, record.state
            )));
        }

        let rootfs = self.inner.images.rootfs_path(&record.spec.image_digest)?;
        self.inner.vfs.initialize(id, Some(&rootfs))?;
        self.inner.vfs.mount(id)?;
        let root = self.inner.vfs.host_root(id)?;

        let launch = match self.build_launch(&record, root, ctx) {
            Ok(launch) => launch,
            Err(e) => {
                let _ = self.inner.vfs.unmount(id);
                return Err(e);
            }
        };
        let plan = launch.plan.clone();

        // The container cgroup (with its resource limits) exists before the
        // child does; the child is moved in right after the clone.
        let container_cgroup = self.prepare_cgroup(&record, ctx);

        let mut launched = match self.inner.engine.launch(launch) {
            Ok(launched) => launched,
            Err(e) => {
                let _ = self.inner.vfs.unmount(id);
                if let Some(cg) = &container_cgroup {
                    let _ = cgroup::remove(cg);
                }
                return Err(e);
            }
        };

        record.cgroup_path = container_cgroup.filter(|cg| {
            match cgroup::add_process(&cgroup::fs_path(cg), launched.pid) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(container_id = %id, error = %e, "placing child in cgroup failed");
                    let _ = cgroup::remove(cg);
                    false
                }
            }
        });

        record.state.transition_to(ContainerState::Running)?;
        record.pid = Some(launched.pid);
        record.started_at = Some(Utc::now());
        record.proc_start_ticks = stats::process_start_ticks(launched.pid);
        self.inner.persist_status(&record);

        // Log capture and exit watch begin with the transition.
        match logs::LogSink::open(&record.log_path) {
            Ok(sink) => {
                if let Some(stdout) = launched.stdout.take() {
                    logs::spawn_pump(stdout, sink.clone(), "stdout");
                }
                if let Some(stderr) = launched.stderr.take() {
                    logs::spawn_pump(stderr, sink, "stderr");
                }
            }
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "log capture unavailable");
            }
        }

        self.reaper
            .watch(id.clone(), Watched::Child(launched.wait), cell.exit.clone());

        tracing::info!(container_id = %id, pid = launched.pid, "started container");
        Ok(StartOutcome {
            pid: launched.pid,
            plan,
        })
    }

    /// Graceful stop: signal, wait up to `timeout`, then force. Idempotent
    /// on containers that are not running; returns once the child is
    /// reaped.
    pub fn stop(&self, id: &ContainerId, timeout: Duration) -> VesselResult<()> {
        let cell = self.inner.cell(id)?;

        let pid = {
            let record = cell.record.lock();
            match record.state {
                ContainerState::Running => record.pid,
                // Created never ran; terminal states are already stopped.
                _ => return Ok(()),
            }
        };
        let Some(pid) = pid else {
            return Ok(());
        };

        crate::isolation::signal_pid(pid, self.inner.stop_signal)?;
        if cell.exit.wait_timeout(timeout).is_some() {
            return Ok(());
        }

        tracing::debug!(container_id = %id, pid, "graceful stop timed out; killing");
        crate::isolation::signal_pid(pid, libc::SIGKILL)?;
        cell.exit
            .wait_timeout(KILL_REAP_TIMEOUT)
            .map(|_| ())
            .ok_or_else(|| {
                VesselError::Internal(format!("container {} not reaped after SIGKILL", id))
            })
    }

    /// Remove a container record. Permitted in `Created` and terminal
    /// states; `force` stops a running container first. Returns the owning
    /// sandbox so the caller can detach the membership.
    pub fn remove(&self, id: &ContainerId, force: bool) -> VesselResult<SandboxId> {
        let cell = self.inner.cell(id)?;

        let running = cell.record.lock().state.is_running();
        if running {
            if !force {
                return Err(VesselError::InUse(format!(
                    "container {} is running; stop it first",
                    id
                )));
            }
            self.stop(id, FORCE_STOP_TIMEOUT)?;
        }

        let record = cell.record.lock();
        let sandbox_id = record.sandbox_id.clone();
        let digest = record.spec.image_digest.clone();
        let container_cgroup = record.cgroup_path.clone();
        drop(record);

        // Release every acquisition: VFS root, cgroup, image reference,
        // log and state storage, reaper watch.
        self.inner.vfs.cleanup(id)?;
        if let Some(cg) = container_cgroup
            && let Err(e) = cgroup::remove(&cg)
        {
            tracing::debug!(container_id = %id, error = %e, "cgroup teardown failed");
        }
        self.inner.refcounts.release(&digest);
        self.inner
            .store
            .remove_record(RecordKind::Container, id.as_str())?;
        self.reaper.forget(id);
        self.inner.index.lock().remove(id);

        tracing::info!(container_id = %id, "removed container");
        Ok(sandbox_id)
    }

    /// Project the record to the CRI status shape.
    pub fn status(&self, id: &ContainerId) -> VesselResult<cri::ContainerStatus> {
        let cell = self.inner.cell(id)?;
        let record = cell.record.lock();
        Ok(record.to_cri_status())
    }

    /// List containers matching the filter, newest first.
    pub fn list(&self, filter: Option<&cri::ContainerFilter>) -> Vec<cri::Container> {
        let cells: Vec<Arc<Cell>> = self.inner.index.lock().values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let record = cell.record.lock();
            if filter.map(|f| record.matches(f)).unwrap_or(true) {
                out.push(record.to_cri_container());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Sample CPU, memory, and writable-layer usage.
    pub fn stats(&self, id: &ContainerId) -> VesselResult<cri::ContainerStats> {
        let cell = self.inner.cell(id)?;
        let record = cell.record.lock();

        let process = match (record.state.is_running(), record.pid) {
            (true, Some(pid)) => stats::sample_process(pid),
            _ => stats::ProcessSample {
                timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0),
                ..Default::default()
            },
        };
        let fs = self.inner.vfs.usage(id).unwrap_or_default();

        Ok(cri::ContainerStats {
            attributes: cri::ContainerAttributes {
                id: record.id.to_string(),
                metadata: record.spec.metadata.clone(),
                labels: record.spec.labels.clone(),
                annotations: record.spec.annotations.clone(),
            },
            cpu: cri::CpuUsage {
                timestamp: process.timestamp_ns,
                usage_core_nano_seconds: process.cpu_core_ns,
            },
            memory: cri::MemoryUsage {
                timestamp: process.timestamp_ns,
                working_set_bytes: process.working_set_bytes,
                rss_bytes: process.rss_bytes,
                page_faults: process.page_faults,
            },
            writable_layer: cri::FilesystemUsage {
                timestamp: process.timestamp_ns,
                fs_id: cri::FilesystemIdentifier {
                    mountpoint: self
                        .inner
                        .vfs
                        .host_root(id)
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                },
                used_bytes: fs.used_bytes,
                inodes_used: fs.inodes_used,
            },
        })
    }

    /// Stats for every container matching the filter.
    pub fn list_stats(&self, filter: Option<&cri::ContainerStatsFilter>) -> Vec<cri::ContainerStats> {
        let ids: Vec<ContainerId> = {
            let index = self.inner.index.lock();
            index.keys().cloned().collect()
        };
        let mut out = Vec::new();
        for id in ids {
            let Ok(cell) = self.inner.cell(&id) else {
                continue;
            };
            {
                let record = cell.record.lock();
                if let Some(f) = filter {
                    if let Some(want) = &f.id
                        && want != record.id.as_str()
                    {
                        continue;
                    }
                    if let Some(want) = &f.pod_sandbox_id
                        && want != record.sandbox_id.as_str()
                    {
                        continue;
                    }
                    if !f
                        .label_selector
                        .iter()
                        .all(|(k, v)| record.spec.labels.get(k) == Some(v))
                    {
                        continue;
                    }
                }
            }
            if let Ok(stats) = self.stats(&id) {
                out.push(stats);
            }
        }
        out.sort_by(|a, b| a.attributes.id.cmp(&b.attributes.id));
        out
    }

    /// Run a command inside the container and buffer its output.
    pub fn exec_sync(
        &self,
        id: &ContainerId,
        cmd: &[String],
        timeout: Duration,
    ) -> VesselResult<cri::ExecSyncResponse> {
        let cell = self.inner.cell(id)?;
        let (pid, working_dir, env) = {
            let record = cell.record.lock();
            if !record.state.is_running() {
                return Err(VesselError::InvalidArg(format!(
                    "container {} is {}; exec requires running",
                    id, record.state
                )));
            }
            (
                record.pid,
                record.spec.working_dir.clone(),
                record.spec.env.clone(),
            )
        };
        let root = self.inner.vfs.host_root(id)?;

        let output = exec::run_sync(
            &exec::ExecTarget {
                backend: self.inner.engine.backend().kind,
                pid,
                root: &root,
                working_dir: &working_dir,
                env: &env,
            },
            cmd,
            timeout,
        )?;
        Ok(cri::ExecSyncResponse {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    /// Register a streaming exec session.
    pub fn exec(&self, req: &cri::ExecRequest) -> VesselResult<StreamSession> {
        let id = self.parse_id(&req.container_id)?;
        self.require_running(&id)?;
        if req.cmd.is_empty() {
            return Err(VesselError::InvalidArg("empty exec command".into()));
        }
        Ok(self.inner.streams.register(StreamKind::Exec {
            container_id: id.to_string(),
            cmd: req.cmd.clone(),
            tty: req.tty,
            stdin: req.stdin,
        }))
    }

    /// Register a streaming attach session.
    pub fn attach(&self, req: &cri::AttachRequest) -> VesselResult<StreamSession> {
        let id = self.parse_id(&req.container_id)?;
        self.require_running(&id)?;
        Ok(self.inner.streams.register(StreamKind::Attach {
            container_id: id.to_string(),
            stdin: req.stdin,
        }))
    }

    /// The stream session registry (shared with the CRI server for
    /// port-forward sessions).
    pub fn streams(&self) -> &StreamRegistry {
        &self.inner.streams
    }

    /// Tail the container log from a byte offset.
    pub fn read_log(
        &self,
        id: &ContainerId,
        offset: u64,
        max_bytes: usize,
    ) -> VesselResult<(Vec<u8>, u64)> {
        let cell = self.inner.cell(id)?;
        let path = cell.record.lock().log_path.clone();
        logs::tail(&path, offset, max_bytes)
    }

    /// Member containers of a sandbox in creation order.
    pub fn sandbox_members(&self, sandbox_id: &SandboxId) -> Vec<ContainerId> {
        let cells: Vec<Arc<Cell>> = self.inner.index.lock().values().cloned().collect();
        let mut members: Vec<(chrono::DateTime<Utc>, ContainerId)> = cells
            .iter()
            .filter_map(|cell| {
                let record = cell.record.lock();
                (record.sandbox_id == *sandbox_id)
                    .then(|| (record.created_at, record.id.clone()))
            })
            .collect();
        members.sort();
        members.into_iter().map(|(_, id)| id).collect()
    }

    /// Whether every member of a sandbox is in a state that permits
    /// sandbox removal.
    pub fn members_terminal(&self, sandbox_id: &SandboxId) -> bool {
        let cells: Vec<Arc<Cell>> = self.inner.index.lock().values().cloned().collect();
        cells.iter().all(|cell| {
            let record = cell.record.lock();
            record.sandbox_id != *sandbox_id || record.state.can_remove()
        })
    }

    /// Snapshot of a record, for orchestration decisions.
    pub fn snapshot(&self, id: &ContainerId) -> VesselResult<ContainerRecord> {
        let cell = self.inner.cell(id)?;
        let record = cell.record.lock();
        Ok(record.clone())
    }

    /// `/proc/<pid>` of a running container, for `Target` namespace modes.
    pub fn proc_dir(&self, id: &ContainerId) -> VesselResult<PathBuf> {
        let cell = self.inner.cell(id)?;
        let record = cell.record.lock();
        match (record.state.is_running(), record.pid) {
            (true, Some(pid)) => Ok(PathBuf::from(format!("/proc/{}", pid))),
            _ => Err(VesselError::InvalidArg(format!(
                "container {} is not running",
                id
            ))),
        }
    }

    /// Warnings collected during the recovery pass, for the runtime status
    /// conditions.
    pub fn recovery_warnings(&self) -> Vec<String> {
        self.inner.recovery_warnings.lock().clone()
    }

    /// Rebuild the in-memory index from on-disk records, reconciling stale
    /// running markers against live PIDs.
    pub fn recover(&self) -> VesselResult<()> {
        let ids = self.inner.store.list_ids(RecordKind::Container)?;
        for raw_id in ids {
            if let Err(e) = self.recover_one(&raw_id) {
                let warning = format!("container {}: {}", raw_id, e);
                tracing::warn!(error = %e, container_id = %raw_id, "skipping record during recovery");
                self.inner.recovery_warnings.lock().push(warning);
            }
        }
        Ok(())
    }

    fn recover_one(&self, raw_id: &str) -> VesselResult<()> {
        let id = ContainerId::parse(raw_id)
            .ok_or_else(|| VesselError::InvalidArg("malformed container id".into()))?;
        let spec_doc: ContainerSpecDoc = self.inner.store.load_spec(RecordKind::Container, raw_id)?;
        let status_doc: ContainerStatusDoc =
            self.inner.store.load_status(RecordKind::Container, raw_id)?;

        let mut record = ContainerRecord::new(
            id.clone(),
            spec_doc.sandbox_id,
            spec_doc.spec,
            self.inner.store.log_path(raw_id),
        );
        record.created_at = spec_doc.created_at;
        record.state = status_doc.state;
        record.pid = status_doc.pid;
        record.started_at = status_doc.started_at;
        record.finished_at = status_doc.finished_at;
        record.exit_code = status_doc.exit_code;
        record.exit_signal = status_doc.exit_signal;
        record.reason = status_doc.reason;
        record.message = status_doc.message;
        record.proc_start_ticks = status_doc.proc_start_ticks;
        record.cgroup_path = status_doc.cgroup_path;

        let exit = ExitSlot::new();
        let mut watch_foreign = None;

        if record.state == ContainerState::Running {
            let resolution = match record.pid {
                Some(pid)
                    if pid_identity_matches(
                        pid,
                        record.proc_start_ticks,
                        record.cgroup_path.as_deref(),
                    ) =>
                {
                    // Same process, same start time, same cgroup: re-bind
                    // and keep watching for its eventual death.
                    watch_foreign = Some(pid);
                    ContainerState::Running
                }
                Some(pid) if reaper_pid_alive(pid) => ContainerState::Unknown,
                _ => ContainerState::Exited,
            };
            if resolution != ContainerState::Running {
                record.state = resolution;
                if resolution == ContainerState::Exited {
                    record.exit_code = record.exit_code.or(Some(-1));
                    record.finished_at = record.finished_at.or(Some(Utc::now()));
                    record.reason = "Recovered".into();
                    record.message = "process was gone after runtime restart".into();
                } else {
                    record.reason = "Unknown".into();
                    record.message = "pid alive but identity mismatch after restart".into();
                    // Resolve Unknown once the impostor pid goes away.
                    watch_foreign = record.pid;
                }
                self.inner.persist_status(&record);
            }
        }

        // Every record keeps its image pinned. Started records re-register
        // their existing tree; Created ones have no tree yet, and seeding
        // happens at start.
        self.inner.refcounts.acquire(&record.spec.image_digest);
        if record.state != ContainerState::Created {
            let _ = self.inner.vfs.initialize(&id, None);
        }

        self.inner.index.lock().insert(
            id.clone(),
            Arc::new(Cell {
                record: Mutex::new(record),
                exit: exit.clone(),
            }),
        );
        if let Some(pid) = watch_foreign {
            self.reaper.watch(id, Watched::Foreign(pid), exit);
        }
        Ok(())
    }

    fn parse_id(&self, raw: &str) -> VesselResult<ContainerId> {
        ContainerId::parse(raw)
            .ok_or_else(|| VesselError::NotFound(format!("no such container: {}", raw)))
    }

    fn require_running(&self, id: &ContainerId) -> VesselResult<()> {
        let cell = self.inner.cell(id)?;
        let record = cell.record.lock();
        if !record.state.is_running() {
            return Err(VesselError::InvalidArg(format!(
                "container {} is {}; operation requires running",
                id, record.state
            )));
        }
        Ok(())
    }

    /// Create the container cgroup under the sandbox parent and apply the
    /// spec's resource limits. `None` when the host offers no writable
    /// hierarchy; requested limits are then reported and skipped.
    fn prepare_cgroup(&self, record: &ContainerRecord, ctx: &StartContext) -> Option<String> {
        let limits = CgroupLimits::from_cri(record.spec.resources.as_ref());
        if !self.inner.engine.backend().caps.resource_limits
            || ctx.cgroup_parent.is_empty()
            || !cgroup::v2_available()
        {
            if !limits.is_empty() {
                tracing::warn!(
                    container_id = %record.id,
                    "resource limits requested but no cgroup hierarchy is available"
                );
            }
            return None;
        }

        let name = format!("{}/{}", ctx.cgroup_parent.trim_end_matches('/'), record.id);
        match cgroup::create(&name) {
            Ok(path) => {
                cgroup::apply_limits(&path, &limits);
                Some(name)
            }
            Err(e) => {
                if limits.is_empty() {
                    tracing::debug!(container_id = %record.id, error = %e, "cgroup unavailable");
                } else {
                    tracing::warn!(
                        container_id = %record.id,
                        error = %e,
                        "resource limits requested but the cgroup could not be created"
                    );
                }
                None
            }
        }
    }

    fn build_launch(
        &self,
        record: &ContainerRecord,
        root: PathBuf,
        ctx: &StartContext,
    ) -> VesselResult<LaunchSpec> {
        let security = record.spec.security.as_ref();

        let plan = plan::compute(
            &self.inner.engine.backend().caps,
            &ctx.sandbox_ns,
            security.and_then(|s| s.namespace_options.as_ref()),
            &ctx.ns_refs,
            ctx.target_proc.as_ref(),
            ctx.hostname.clone(),
        )?;

        let caps = match security.and_then(|s| s.capabilities.as_ref()) {
            Some(c) => CapabilityPlan::new(&c.add_capabilities, &c.drop_capabilities)?,
            None => CapabilityPlan::default(),
        };

        let mut idmap = IdMapConfig::for_caller();
        if let Some(sec) = security {
            if let Some(uid) = sec.run_as_user {
                idmap.run_as.0 = uid as u32;
            }
            if let Some(gid) = sec.run_as_group {
                idmap.run_as.1 = gid as u32;
            }
        }

        let mut mounts = Vec::new();
        for m in &record.spec.mounts {
            if plan.isolates() {
                mounts.push(MountSpec {
                    kind: MountKind::Bind,
                    source: Some(PathBuf::from(&m.host_path)),
                    target: m.container_path.clone(),
                    readonly: m.readonly,
                    propagation: m.propagation,
                });
            } else {
                // Directory-convention fallback on simulating backends:
                // overlapping destinations shadow in declaration order.
                let target = root.join(m.container_path.trim_start_matches('/'));
                std::fs::create_dir_all(&target)?;
            }
        }

        Ok(LaunchSpec {
            container_id: record.id.clone(),
            rootfs: root,
            command: record.spec.argv(),
            env: record.spec.env.clone(),
            working_dir: record.spec.working_dir.clone(),
            plan,
            idmap,
            caps,
            no_new_privs: security.map(|s| s.no_new_privs).unwrap_or(true),
            supplemental_groups: security
                .map(|s| s.supplemental_groups.iter().map(|g| *g as u32).collect())
                .unwrap_or_default(),
            mounts,
        })
    }
}

/// Re-binding to `Running` requires pid liveness, a matching start time,
/// and, when one was recorded, a matching cgroup.
fn pid_identity_matches(
    pid: u32,
    recorded_ticks: Option<u64>,
    recorded_cgroup: Option<&str>,
) -> bool {
    if !reaper_pid_alive(pid) {
        return false;
    }
    let ticks_match = match (recorded_ticks, stats::process_start_ticks(pid)) {
        (Some(recorded), Some(current)) => recorded == current,
        // Without a recorded start time, liveness is the best we have.
        (None, _) => true,
        (Some(_), None) => false,
    };
    if !ticks_match {
        return false;
    }
    match recorded_cgroup {
        Some(recorded) => cgroup::process_cgroup(pid).as_deref() == Some(recorded),
        // No cgroup was recorded (simulating backend, rootless host); the
        // pid and start time carry the comparison alone.
        None => true,
    }
}

#[cfg(unix)]
fn reaper_pid_alive(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) probes existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn reaper_pid_alive(_pid: u32) -> bool {
    false
}
