//! Container records and their persisted documents.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

use super::state::ContainerState;
use crate::ids::{ContainerId, SandboxId};

/// Validated, internal form of a CRI container configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub metadata: cri::ContainerMetadata,
    /// Image reference as given at creation.
    pub image: String,
    /// Resolved content digest (`sha256:<hex>`).
    pub image_digest: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: String,
    /// Environment; keys are unique, last assignment wins.
    pub env: Vec<(String, String)>,
    pub mounts: Vec<cri::Mount>,
    pub devices: Vec<cri::Device>,
    pub resources: Option<cri::LinuxContainerResources>,
    pub security: Option<cri::LinuxContainerSecurityContext>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub stdin: bool,
    pub tty: bool,
}

impl ContainerSpec {
    /// Validate a CRI config against an already-resolved image digest.
    pub fn from_config(
        config: cri::ContainerConfig,
        image_digest: String,
    ) -> VesselResult<Self> {
        if config.metadata.name.is_empty() {
            return Err(VesselError::InvalidArg("container name is empty".into()));
        }
        if config.command.is_empty() {
            return Err(VesselError::InvalidArg(format!(
                "container {} has no command",
                config.metadata.name
            )));
        }
        for m in &config.mounts {
            if !m.container_path.starts_with('/') {
                return Err(VesselError::InvalidArg(format!(
                    "mount destination must be absolute: {}",
                    m.container_path
                )));
            }
        }

        // Keys unique, ordering irrelevant: later assignments win.
        let mut env: Vec<(String, String)> = Vec::with_capacity(config.envs.len());
        for kv in config.envs {
            if let Some(slot) = env.iter_mut().find(|(k, _)| *k == kv.key) {
                slot.1 = kv.value;
            } else {
                env.push((kv.key, kv.value));
            }
        }

        let (resources, security) = match config.linux {
            Some(linux) => (linux.resources, linux.security_context),
            None => (None, None),
        };

        Ok(Self {
            metadata: config.metadata,
            image: config.image.image,
            image_digest,
            command: config.command,
            args: config.args,
            working_dir: if config.working_dir.is_empty() {
                "/".to_string()
            } else {
                config.working_dir
            },
            env,
            mounts: config.mounts,
            devices: config.devices,
            resources,
            security,
            labels: config.labels,
            annotations: config.annotations,
            stdin: config.stdin,
            tty: config.tty,
        })
    }

    /// Full argv: command followed by args.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// The supervisor-owned record of one container.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub sandbox_id: SandboxId,
    pub spec: ContainerSpec,
    pub state: ContainerState,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub reason: String,
    pub message: String,
    /// `/proc/<pid>/stat` start time at exec, for crash-recovery matching.
    pub proc_start_ticks: Option<u64>,
    /// Hierarchy-relative cgroup the child was placed in, when the host
    /// allowed one. Consulted with pid and start time during recovery.
    pub cgroup_path: Option<String>,
    /// Host path of the captured entrypoint log.
    pub log_path: PathBuf,
}

impl ContainerRecord {
    pub fn new(
        id: ContainerId,
        sandbox_id: SandboxId,
        spec: ContainerSpec,
        log_path: PathBuf,
    ) -> Self {
        Self {
            id,
            sandbox_id,
            spec,
            state: ContainerState::Created,
            pid: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            exit_signal: None,
            reason: String::new(),
            message: String::new(),
            proc_start_ticks: None,
            cgroup_path: None,
            log_path,
        }
    }

    /// Immutable creation document (`spec`).
    pub fn spec_doc(&self) -> ContainerSpecDoc {
        ContainerSpecDoc {
            id: self.id.clone(),
            sandbox_id: self.sandbox_id.clone(),
            spec: self.spec.clone(),
            created_at: self.created_at,
        }
    }

    /// Mutable status document (`status`), replaced on every transition.
    pub fn status_doc(&self) -> ContainerStatusDoc {
        ContainerStatusDoc {
            state: self.state,
            pid: self.pid,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: self.exit_code,
            exit_signal: self.exit_signal,
            reason: self.reason.clone(),
            message: self.message.clone(),
            proc_start_ticks: self.proc_start_ticks,
            cgroup_path: self.cgroup_path.clone(),
        }
    }

    /// Projection to the CRI status shape.
    pub fn to_cri_status(&self) -> cri::ContainerStatus {
        cri::ContainerStatus {
            id: self.id.to_string(),
            metadata: self.spec.metadata.clone(),
            state: self.state.to_cri(),
            created_at: ts_ns(Some(self.created_at)),
            started_at: ts_ns(self.started_at),
            finished_at: ts_ns(self.finished_at),
            exit_code: self.exit_code.unwrap_or(0),
            image: cri::ImageSpec {
                image: self.spec.image.clone(),
            },
            image_ref: self.spec.image_digest.clone(),
            reason: self.reason.clone(),
            message: self.message.clone(),
            labels: self.spec.labels.clone(),
            annotations: self.spec.annotations.clone(),
            mounts: self.spec.mounts.clone(),
            log_path: self.log_path.to_string_lossy().into_owned(),
        }
    }

    /// Projection to the CRI list item.
    pub fn to_cri_container(&self) -> cri::Container {
        cri::Container {
            id: self.id.to_string(),
            pod_sandbox_id: self.sandbox_id.to_string(),
            metadata: self.spec.metadata.clone(),
            image: cri::ImageSpec {
                image: self.spec.image.clone(),
            },
            image_ref: self.spec.image_digest.clone(),
            state: self.state.to_cri(),
            created_at: ts_ns(Some(self.created_at)),
            labels: self.spec.labels.clone(),
            annotations: self.spec.annotations.clone(),
        }
    }

    /// Filter evaluation: every present predicate must hold.
    pub fn matches(&self, filter: &cri::ContainerFilter) -> bool {
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
        if let Some(sandbox) = &filter.pod_sandbox_id
            && self.sandbox_id.as_str() != sandbox
        {
            return false;
        }
        filter
            .label_selector
            .iter()
            .all(|(k, v)| self.spec.labels.get(k) == Some(v))
    }
}

/// Persisted `spec` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpecDoc {
    pub id: ContainerId,
    pub sandbox_id: SandboxId,
    pub spec: ContainerSpec,
    pub created_at: DateTime<Utc>,
}

/// Persisted `status` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatusDoc {
    pub state: ContainerState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub proc_start_ticks: Option<u64>,
    #[serde(default)]
    pub cgroup_path: Option<String>,
}

fn ts_ns(t: Option<DateTime<Utc>>) -> i64 {
    t.and_then(|t| t.timestamp_nanos_opt()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> cri::ContainerConfig {
        cri::ContainerConfig {
            metadata: cri::ContainerMetadata {
                name: name.into(),
                attempt: 0,
            },
            image: cri::ImageSpec {
                image: "alpine:latest".into(),
            },
            command: vec!["echo".into()],
            args: vec!["hi".into()],
            ..Default::default()
        }
    }

    #[test]
    fn env_keys_dedupe_last_wins() {
        let mut cfg = config("web");
        cfg.envs = vec![
            cri::KeyValue {
                key: "A".into(),
                value: "1".into(),
            },
            cri::KeyValue {
                key: "B".into(),
                value: "2".into(),
            },
            cri::KeyValue {
                key: "A".into(),
                value: "3".into(),
            },
        ];
        let spec = ContainerSpec::from_config(cfg, "sha256:d".into()).unwrap();
        assert_eq!(
            spec.env,
            vec![("A".to_string(), "3".to_string()), ("B".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn empty_command_rejected() {
        let mut cfg = config("web");
        cfg.command.clear();
        let err = ContainerSpec::from_config(cfg, "sha256:d".into()).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::InvalidArg);
    }

    #[test]
    fn relative_mount_destination_rejected() {
        let mut cfg = config("web");
        cfg.mounts = vec![cri::Mount {
            host_path: "/data".into(),
            container_path: "data".into(),
            ..Default::default()
        }];
        let err = ContainerSpec::from_config(cfg, "sha256:d".into()).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::InvalidArg);
    }

    #[test]
    fn argv_concatenates_command_and_args() {
        let spec = ContainerSpec::from_config(config("web"), "sha256:d".into()).unwrap();
        assert_eq!(spec.argv(), vec!["echo".to_string(), "hi".to_string()]);
    }

    #[test]
    fn filter_matching() {
        let spec = ContainerSpec::from_config(
            {
                let mut c = config("web");
                c.labels.insert("app".into(), "web".into());
                c
            },
            "sha256:d".into(),
        )
        .unwrap();
        let record = ContainerRecord::new(
            ContainerId::generate(),
            SandboxId::generate(),
            spec,
            PathBuf::from("/tmp/log"),
        );

        assert!(record.matches(&cri::ContainerFilter::default()));
        assert!(record.matches(&cri::ContainerFilter {
            state: Some(cri::ContainerState::ContainerCreated),
            ..Default::default()
        }));
        assert!(!record.matches(&cri::ContainerFilter {
            state: Some(cri::ContainerState::ContainerRunning),
            ..Default::default()
        }));
        assert!(record.matches(&cri::ContainerFilter {
            label_selector: HashMap::from([("app".to_string(), "web".to_string())]),
            ..Default::default()
        }));
        assert!(!record.matches(&cri::ContainerFilter {
            label_selector: HashMap::from([("app".to_string(), "db".to_string())]),
            ..Default::default()
        }));
    }
}
