//! Sandbox network attachment parameters.
//!
//! The core does not program the host network; it emits the parameters a
//! bridge attachment needs (bridge name, namespace label, port mappings)
//! and leaves the wiring to the network collaborator.

use serde::{Deserialize, Serialize};
use vessel_shared::cri;

use crate::ids::SandboxId;

/// Parameters for attaching a sandbox's network namespace to a host bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeAttachment {
    pub bridge: String,
    /// Stable label for the sandbox's network namespace.
    pub netns: String,
    pub port_mappings: Vec<cri::PortMapping>,
}

impl BridgeAttachment {
    pub fn plan(bridge: &str, sandbox_id: &SandboxId, config: &cri::PodSandboxConfig) -> Self {
        Self {
            bridge: bridge.to_string(),
            netns: format!("vsl-{}", sandbox_id.short().to_lowercase()),
            port_mappings: config.port_mappings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_carries_ports_and_names() {
        let id = SandboxId::generate();
        let config = cri::PodSandboxConfig {
            metadata: cri::PodSandboxMetadata {
                name: "pod".into(),
                uid: "u".into(),
                namespace: "ns".into(),
                attempt: 0,
            },
            port_mappings: vec![cri::PortMapping {
                protocol: cri::Protocol::Tcp,
                container_port: 80,
                host_port: 8080,
                host_ip: String::new(),
            }],
            ..Default::default()
        };

        let attachment = BridgeAttachment::plan("vessel0", &id, &config);
        assert_eq!(attachment.bridge, "vessel0");
        assert!(attachment.netns.starts_with("vsl-"));
        assert_eq!(attachment.port_mappings.len(), 1);
        assert_eq!(attachment.port_mappings[0].host_port, 8080);
    }
}
