//! Runtime configuration.

use std::path::PathBuf;

use vessel_shared::constants::{defaults, dirs as layout_dirs, envs};

/// Options the core recognizes. Environment and CLI surfaces feed these in.
#[derive(Clone, Debug)]
pub struct VesselOptions {
    /// State and log root.
    pub data_dir: PathBuf,
    /// Backend label to use; auto-selected when absent.
    pub runtime: Option<String>,
    /// Serve the CRI endpoint.
    pub cri_enabled: bool,
    pub cri_port: u16,
    /// Default network bridge for sandboxes.
    pub bridge_name: String,
    /// Log filter (same syntax as `RUST_LOG`).
    pub log_level: Option<String>,
    /// Log to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for VesselOptions {
    fn default() -> Self {
        let data_dir = std::env::var(envs::VESSEL_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(layout_dirs::VESSEL_DIR);
                path
            });

        Self {
            data_dir,
            runtime: None,
            cri_enabled: false,
            cri_port: defaults::CRI_PORT,
            bridge_name: defaults::BRIDGE_NAME.to_string(),
            log_level: None,
            log_file: None,
        }
    }
}
