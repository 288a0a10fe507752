//! CRI service implementation over the runtime facade.

use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

use super::{ImageService, RuntimeService};
use crate::images::ImageRecord;
use crate::runtime::VesselRuntime;
use crate::supervisor::StreamSession;

/// Translates CRI calls onto the runtime and formats streaming URLs.
#[derive(Clone)]
pub struct CriService {
    runtime: VesselRuntime,
    /// `<scheme>://<host>:<port>` prefix for streaming session URLs.
    stream_base: String,
}

impl CriService {
    pub fn new(runtime: VesselRuntime, stream_base: String) -> Self {
        Self {
            runtime,
            stream_base,
        }
    }

    /// `<scheme>://<host>:<port>/<session>`; the token alone identifies
    /// the session, the registry resolves what it is for.
    fn stream_url(&self, session: &StreamSession) -> String {
        format!("{}/{}", self.stream_base, session.token)
    }
}

impl RuntimeService for CriService {
    fn version(&self, _api_version: &str) -> VesselResult<cri::VersionResponse> {
        Ok(self.runtime.version())
    }

    fn run_pod_sandbox(&self, config: cri::PodSandboxConfig) -> VesselResult<String> {
        self.runtime.run_sandbox(config)
    }

    fn stop_pod_sandbox(&self, pod_sandbox_id: &str) -> VesselResult<()> {
        self.runtime.stop_sandbox(pod_sandbox_id)
    }

    fn remove_pod_sandbox(&self, pod_sandbox_id: &str) -> VesselResult<()> {
        self.runtime.remove_sandbox(pod_sandbox_id)
    }

    fn pod_sandbox_status(&self, pod_sandbox_id: &str) -> VesselResult<cri::PodSandboxStatus> {
        self.runtime.sandbox_status(pod_sandbox_id)
    }

    fn list_pod_sandbox(
        &self,
        filter: Option<cri::PodSandboxFilter>,
    ) -> VesselResult<Vec<cri::PodSandbox>> {
        Ok(self.runtime.list_sandboxes(filter.as_ref()))
    }

    fn create_container(
        &self,
        pod_sandbox_id: &str,
        config: cri::ContainerConfig,
    ) -> VesselResult<String> {
        self.runtime.create_container(pod_sandbox_id, config)
    }

    fn start_container(&self, container_id: &str) -> VesselResult<()> {
        self.runtime.start_container(container_id)
    }

    fn stop_container(&self, container_id: &str, timeout: i64) -> VesselResult<()> {
        self.runtime.stop_container(container_id, timeout)
    }

    fn remove_container(&self, container_id: &str) -> VesselResult<()> {
        self.runtime.remove_container(container_id, false)
    }

    fn list_containers(
        &self,
        filter: Option<cri::ContainerFilter>,
    ) -> VesselResult<Vec<cri::Container>> {
        Ok(self.runtime.list_containers(filter.as_ref()))
    }

    fn container_status(&self, container_id: &str) -> VesselResult<cri::ContainerStatus> {
        self.runtime.container_status(container_id)
    }

    fn container_stats(&self, container_id: &str) -> VesselResult<cri::ContainerStats> {
        self.runtime.container_stats(container_id)
    }

    fn list_container_stats(
        &self,
        filter: Option<cri::ContainerStatsFilter>,
    ) -> VesselResult<Vec<cri::ContainerStats>> {
        Ok(self.runtime.list_container_stats(filter.as_ref()))
    }

    fn exec_sync(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        timeout: i64,
    ) -> VesselResult<cri::ExecSyncResponse> {
        self.runtime.exec_sync(container_id, &cmd, timeout)
    }

    fn exec(&self, request: cri::ExecRequest) -> VesselResult<cri::ExecResponse> {
        let session = self.runtime.exec(&request)?;
        Ok(cri::ExecResponse {
            url: self.stream_url(&session),
        })
    }

    fn attach(&self, request: cri::AttachRequest) -> VesselResult<cri::AttachResponse> {
        let session = self.runtime.attach(&request)?;
        Ok(cri::AttachResponse {
            url: self.stream_url(&session),
        })
    }

    fn port_forward(
        &self,
        request: cri::PortForwardRequest,
    ) -> VesselResult<cri::PortForwardResponse> {
        let session = self.runtime.port_forward(&request)?;
        Ok(cri::PortForwardResponse {
            url: self.stream_url(&session),
        })
    }

    fn status(&self) -> VesselResult<cri::RuntimeStatus> {
        Ok(self.runtime.runtime_status())
    }
}

impl ImageService for CriService {
    fn list_images(&self, filter: Option<cri::ImageFilter>) -> VesselResult<Vec<cri::Image>> {
        let needle = filter
            .and_then(|f| f.image)
            .map(|spec| spec.image)
            .filter(|s| !s.is_empty());
        Ok(self
            .runtime
            .images()
            .list(needle.as_deref())
            .iter()
            .map(project_image)
            .collect())
    }

    fn image_status(&self, image: cri::ImageSpec) -> VesselResult<Option<cri::Image>> {
        match self.runtime.images().get(&image.image) {
            Ok(record) => Ok(Some(project_image(&record))),
            Err(VesselError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_image(&self, image: cri::ImageSpec) -> VesselResult<()> {
        self.runtime.images().remove(&image.image)
    }

    fn image_fs_info(&self) -> VesselResult<Vec<cri::FilesystemUsage>> {
        let usage = self.runtime.images().fs_usage();
        Ok(vec![cri::FilesystemUsage {
            timestamp: usage.timestamp_ns,
            fs_id: cri::FilesystemIdentifier {
                mountpoint: usage.mountpoint,
            },
            used_bytes: usage.used_bytes,
            inodes_used: usage.inodes_used,
        }])
    }
}

fn project_image(record: &ImageRecord) -> cri::Image {
    cri::Image {
        id: record.digest.clone(),
        repo_tags: record.repo_tags.clone(),
        repo_digests: vec![record.digest.clone()],
        size: record.size_bytes,
        created_at: record.created_at.timestamp_nanos_opt().unwrap_or(0),
    }
}
