//! Container Runtime Interface wire shapes.
//!
//! These are the request/response message types served over the local CRI
//! socket. Field conventions:
//! - identifiers are opaque printable-ASCII strings
//! - timestamps are signed 64-bit nanoseconds since the Unix epoch
//! - byte sizes are unsigned 64-bit
//! - `Protocol` and `NamespaceMode` serialize as their numeric values

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// ENUMS
// ============================================================================

/// Port protocol. Wire values: TCP=0, UDP=1, SCTP=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl From<Protocol> for u8 {
    fn from(p: Protocol) -> u8 {
        match p {
            Protocol::Tcp => 0,
            Protocol::Udp => 1,
            Protocol::Sctp => 2,
        }
    }
}

impl TryFrom<u8> for Protocol {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Protocol::Tcp),
            1 => Ok(Protocol::Udp),
            2 => Ok(Protocol::Sctp),
            other => Err(format!("unknown protocol value {}", other)),
        }
    }
}

/// Namespace sharing mode. Wire values: Pod=0, Container=1, Node=2, Target=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NamespaceMode {
    /// Shared with the pod sandbox.
    Pod,
    /// Private to the container.
    Container,
    /// Shared with the host.
    Node,
    /// Joined from another container (`target_id`).
    Target,
}

impl Default for NamespaceMode {
    fn default() -> Self {
        NamespaceMode::Pod
    }
}

impl From<NamespaceMode> for u8 {
    fn from(m: NamespaceMode) -> u8 {
        match m {
            NamespaceMode::Pod => 0,
            NamespaceMode::Container => 1,
            NamespaceMode::Node => 2,
            NamespaceMode::Target => 3,
        }
    }
}

impl TryFrom<u8> for NamespaceMode {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(NamespaceMode::Pod),
            1 => Ok(NamespaceMode::Container),
            2 => Ok(NamespaceMode::Node),
            3 => Ok(NamespaceMode::Target),
            other => Err(format!("unknown namespace mode {}", other)),
        }
    }
}

/// Mount propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountPropagation {
    #[default]
    Private,
    HostToContainer,
    Bidirectional,
}

/// Pod sandbox lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodSandboxState {
    SandboxReady,
    SandboxNotReady,
}

/// Container lifecycle state as projected to CRI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    ContainerCreated,
    ContainerRunning,
    ContainerExited,
    ContainerUnknown,
}

// ============================================================================
// SANDBOX MESSAGES
// ============================================================================

/// Identity of a pod sandbox: the name+uid+namespace+attempt tuple must be
/// unique among non-removed sandboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PodSandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    pub protocol: Protocol,
    pub container_port: i32,
    pub host_port: i32,
    #[serde(default)]
    pub host_ip: String,
}

/// Which namespaces members of a sandbox share.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NamespaceOption {
    #[serde(default)]
    pub network: NamespaceMode,
    #[serde(default)]
    pub pid: NamespaceMode,
    #[serde(default)]
    pub ipc: NamespaceMode,
    #[serde(default)]
    pub uts: NamespaceMode,
    /// Container whose namespaces are joined when a mode is `Target`.
    #[serde(default)]
    pub target_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinuxPodSandboxConfig {
    #[serde(default)]
    pub cgroup_parent: String,
    #[serde(default)]
    pub namespace_options: NamespaceOption,
    #[serde(default)]
    pub sysctls: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PodSandboxConfig {
    pub metadata: PodSandboxMetadata,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub log_directory: String,
    #[serde(default)]
    pub dns_config: Option<DnsConfig>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub linux: Option<LinuxPodSandboxConfig>,
}

/// List filter for sandboxes. All present fields must match; every label in
/// `label_selector` must be present with an equal value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PodSandboxFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: Option<PodSandboxState>,
    #[serde(default)]
    pub label_selector: HashMap<String, String>,
}

/// Sandbox list item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSandbox {
    pub id: String,
    pub metadata: PodSandboxMetadata,
    pub state: PodSandboxState,
    pub created_at: i64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PodSandboxNetworkStatus {
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSandboxStatus {
    pub id: String,
    pub metadata: PodSandboxMetadata,
    pub state: PodSandboxState,
    pub created_at: i64,
    #[serde(default)]
    pub network: PodSandboxNetworkStatus,
    #[serde(default)]
    pub namespace_options: NamespaceOption,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

// ============================================================================
// CONTAINER MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerMetadata {
    pub name: String,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageSpec {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A host directory or file mapped into the container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub propagation: MountPropagation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Device {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub permissions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinuxContainerResources {
    #[serde(default)]
    pub cpu_period: i64,
    #[serde(default)]
    pub cpu_quota: i64,
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default)]
    pub memory_limit_in_bytes: i64,
    #[serde(default)]
    pub pids_limit: i64,
}

/// Two orthogonal capability sets; drop is applied first, then add, with
/// drop winning on conflict.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capabilities {
    #[serde(default)]
    pub add_capabilities: Vec<String>,
    #[serde(default)]
    pub drop_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinuxContainerSecurityContext {
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub namespace_options: Option<NamespaceOption>,
    #[serde(default)]
    pub run_as_user: Option<i64>,
    #[serde(default)]
    pub run_as_group: Option<i64>,
    #[serde(default)]
    pub supplemental_groups: Vec<i64>,
    #[serde(default)]
    pub readonly_rootfs: bool,
    #[serde(default)]
    pub no_new_privs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinuxContainerConfig {
    #[serde(default)]
    pub resources: Option<LinuxContainerResources>,
    #[serde(default)]
    pub security_context: Option<LinuxContainerSecurityContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerConfig {
    pub metadata: ContainerMetadata,
    pub image: ImageSpec,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub envs: Vec<KeyValue>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdin_once: bool,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub linux: Option<LinuxContainerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: Option<ContainerState>,
    #[serde(default)]
    pub pod_sandbox_id: Option<String>,
    #[serde(default)]
    pub label_selector: HashMap<String, String>,
}

/// Container list item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub pod_sandbox_id: String,
    pub metadata: ContainerMetadata,
    pub image: ImageSpec,
    pub image_ref: String,
    pub state: ContainerState,
    pub created_at: i64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub metadata: ContainerMetadata,
    pub state: ContainerState,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub finished_at: i64,
    #[serde(default)]
    pub exit_code: i32,
    pub image: ImageSpec,
    pub image_ref: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub log_path: String,
}

// ============================================================================
// STATS MESSAGES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerAttributes {
    pub id: String,
    pub metadata: ContainerMetadata,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuUsage {
    pub timestamp: i64,
    /// Cumulative CPU time consumed, in core-nanoseconds.
    pub usage_core_nano_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryUsage {
    pub timestamp: i64,
    pub working_set_bytes: u64,
    pub rss_bytes: u64,
    pub page_faults: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilesystemIdentifier {
    pub mountpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilesystemUsage {
    pub timestamp: i64,
    pub fs_id: FilesystemIdentifier,
    pub used_bytes: u64,
    pub inodes_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerStats {
    pub attributes: ContainerAttributes,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub writable_layer: FilesystemUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerStatsFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pod_sandbox_id: Option<String>,
    #[serde(default)]
    pub label_selector: HashMap<String, String>,
}

// ============================================================================
// STREAMING MESSAGES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecRequest {
    pub container_id: String,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttachRequest {
    pub container_id: String,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortForwardRequest {
    pub pod_sandbox_id: String,
    #[serde(default)]
    pub port: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecSyncResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

// ============================================================================
// IMAGE MESSAGES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Content digest, `sha256:<hex>`.
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub repo_digests: Vec<String>,
    pub size: u64,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageFilter {
    #[serde(default)]
    pub image: Option<ImageSpec>,
}

// ============================================================================
// RUNTIME STATUS & VERSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeStatus {
    pub conditions: Vec<RuntimeCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub runtime_name: String,
    pub runtime_version: String,
    pub runtime_api_version: String,
}

// ============================================================================
// WIRE ENVELOPE
// ============================================================================

/// CRI status codes carried in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriStatusCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    DeadlineExceeded,
    Unimplemented,
    Internal,
}

/// One request line on the CRI socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriErrorBody {
    pub code: CriStatusCode,
    pub message: String,
}

/// One response line on the CRI socket. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CriErrorBody>,
}

impl CriResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: CriStatusCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(CriErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}
