//! Container Runtime Interface service layer.
//!
//! Every operation is a pure translation from the request onto the
//! supervisor, sandbox manager, or image store, plus a projection back to
//! the CRI shape; the only logic added here is filter evaluation and error
//! mapping.

mod server;
mod service;

pub use server::serve;
pub use service::CriService;

use vessel_shared::cri;
use vessel_shared::{ErrorKind, VesselError, VesselResult};

/// The runtime service surface (pod sandboxes, containers, streaming,
/// stats, runtime status).
pub trait RuntimeService {
    fn version(&self, api_version: &str) -> VesselResult<cri::VersionResponse>;

    fn run_pod_sandbox(&self, config: cri::PodSandboxConfig) -> VesselResult<String>;
    fn stop_pod_sandbox(&self, pod_sandbox_id: &str) -> VesselResult<()>;
    fn remove_pod_sandbox(&self, pod_sandbox_id: &str) -> VesselResult<()>;
    fn pod_sandbox_status(&self, pod_sandbox_id: &str) -> VesselResult<cri::PodSandboxStatus>;
    fn list_pod_sandbox(
        &self,
        filter: Option<cri::PodSandboxFilter>,
    ) -> VesselResult<Vec<cri::PodSandbox>>;

    fn create_container(
        &self,
        pod_sandbox_id: &str,
        config: cri::ContainerConfig,
    ) -> VesselResult<String>;
    fn start_container(&self, container_id: &str) -> VesselResult<()>;
    fn stop_container(&self, container_id: &str, timeout: i64) -> VesselResult<()>;
    fn remove_container(&self, container_id: &str) -> VesselResult<()>;
    fn list_containers(
        &self,
        filter: Option<cri::ContainerFilter>,
    ) -> VesselResult<Vec<cri::Container>>;
    fn container_status(&self, container_id: &str) -> VesselResult<cri::ContainerStatus>;

    fn container_stats(&self, container_id: &str) -> VesselResult<cri::ContainerStats>;
    fn list_container_stats(
        &self,
        filter: Option<cri::ContainerStatsFilter>,
    ) -> VesselResult<Vec<cri::ContainerStats>>;

    fn exec_sync(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        timeout: i64,
    ) -> VesselResult<cri::ExecSyncResponse>;
    fn exec(&self, request: cri::ExecRequest) -> VesselResult<cri::ExecResponse>;
    fn attach(&self, request: cri::AttachRequest) -> VesselResult<cri::AttachResponse>;
    fn port_forward(
        &self,
        request: cri::PortForwardRequest,
    ) -> VesselResult<cri::PortForwardResponse>;

    fn status(&self) -> VesselResult<cri::RuntimeStatus>;
}

/// The image service surface.
pub trait ImageService {
    fn list_images(&self, filter: Option<cri::ImageFilter>) -> VesselResult<Vec<cri::Image>>;
    /// `Ok(None)` when the image does not exist, matching CRI semantics.
    fn image_status(&self, image: cri::ImageSpec) -> VesselResult<Option<cri::Image>>;
    fn remove_image(&self, image: cri::ImageSpec) -> VesselResult<()>;
    fn image_fs_info(&self) -> VesselResult<Vec<cri::FilesystemUsage>>;
}

/// Error-kind to CRI status-code mapping.
pub fn status_code(err: &VesselError) -> cri::CriStatusCode {
    match err.kind() {
        ErrorKind::NotFound => cri::CriStatusCode::NotFound,
        ErrorKind::AlreadyExists => cri::CriStatusCode::AlreadyExists,
        ErrorKind::InvalidArg => cri::CriStatusCode::InvalidArgument,
        ErrorKind::InUse => cri::CriStatusCode::FailedPrecondition,
        ErrorKind::Timeout => cri::CriStatusCode::DeadlineExceeded,
        ErrorKind::Unsupported => cri::CriStatusCode::Unimplemented,
        ErrorKind::StartFailed | ErrorKind::Internal => cri::CriStatusCode::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_matches_the_contract() {
        assert_eq!(
            status_code(&VesselError::NotFound("x".into())),
            cri::CriStatusCode::NotFound
        );
        assert_eq!(
            status_code(&VesselError::InUse("x".into())),
            cri::CriStatusCode::FailedPrecondition
        );
        assert_eq!(
            status_code(&VesselError::start_failed("exec", "boom")),
            cri::CriStatusCode::Internal
        );
        assert_eq!(
            status_code(&VesselError::InvalidArg("x".into())),
            cri::CriStatusCode::InvalidArgument
        );
        assert_eq!(
            status_code(&VesselError::Timeout("x".into())),
            cri::CriStatusCode::DeadlineExceeded
        );
    }

    #[test]
    fn start_failed_keeps_cause_in_message() {
        let err = VesselError::start_failed("pivot_root", "EPERM");
        assert_eq!(status_code(&err), cri::CriStatusCode::Internal);
        assert!(err.to_string().contains("pivot_root"));
        assert!(err.to_string().contains("EPERM"));
    }
}
