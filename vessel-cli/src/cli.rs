//! Top-level CLI definition and shared flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vessel::{VesselOptions, VesselRuntime};
use vessel_shared::cri;

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "vessel", version, about = "Vessel container runtime")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub struct GlobalFlags {
    /// State and log root.
    #[arg(long, global = true, env = "VESSEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Isolation backend label (auto-selected if absent).
    #[arg(long, global = true)]
    pub runtime: Option<String>,

    /// Log filter, e.g. `info` or `vessel=debug`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

impl GlobalFlags {
    pub fn options(&self) -> VesselOptions {
        let mut options = VesselOptions::default();
        if let Some(dir) = &self.data_dir {
            options.data_dir = dir.clone();
        }
        options.runtime = self.runtime.clone();
        options.log_level = self.log_level.clone();
        options
    }

    pub fn create_runtime(&self) -> anyhow::Result<VesselRuntime> {
        Ok(VesselRuntime::new(self.options())?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container in the default sandbox.
    Create(commands::create::CreateArgs),
    /// Start created container(s).
    Start(commands::start::StartArgs),
    /// Create and start a container, waiting for it to exit.
    Run(commands::run::RunArgs),
    /// Stop running container(s).
    Stop(commands::stop::StopArgs),
    /// Remove container(s).
    Rm(commands::rm::RmArgs),
    /// List containers.
    Ps(commands::ps::PsArgs),
    /// Print a container's captured log.
    Logs(commands::logs::LogsArgs),
    /// Run a command inside a running container.
    Exec(commands::exec::ExecArgs),
    /// Manage images.
    #[command(subcommand)]
    Images(commands::images::ImagesCommand),
    /// List pod sandboxes.
    Pods(commands::pods::PodsArgs),
    /// Serve the CRI endpoint.
    Serve(commands::serve::ServeArgs),
    /// Report the selected backend and host capabilities.
    Info(commands::info::InfoArgs),
}

/// Name and namespace of the sandbox CLI-created containers live in.
pub const DEFAULT_SANDBOX_NAME: &str = "default";
pub const DEFAULT_SANDBOX_NAMESPACE: &str = "vessel";

/// Find or create the CLI's default sandbox.
///
/// The default sandbox relaxes every namespace to node mode so containers
/// run on whichever backend the host offers.
pub fn ensure_default_sandbox(runtime: &VesselRuntime) -> anyhow::Result<String> {
    let existing = runtime.list_sandboxes(None);
    if let Some(sb) = existing.iter().find(|s| {
        s.metadata.name == DEFAULT_SANDBOX_NAME
            && s.metadata.namespace == DEFAULT_SANDBOX_NAMESPACE
            && s.state == cri::PodSandboxState::SandboxReady
    }) {
        return Ok(sb.id.clone());
    }

    let node = cri::NamespaceMode::Node;
    let config = cri::PodSandboxConfig {
        metadata: cri::PodSandboxMetadata {
            name: DEFAULT_SANDBOX_NAME.into(),
            uid: "cli".into(),
            namespace: DEFAULT_SANDBOX_NAMESPACE.into(),
            attempt: next_attempt(&existing),
        },
        linux: Some(cri::LinuxPodSandboxConfig {
            namespace_options: cri::NamespaceOption {
                network: node,
                pid: node,
                ipc: node,
                uts: node,
                target_id: String::new(),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(runtime.run_sandbox(config)?)
}

fn next_attempt(existing: &[cri::PodSandbox]) -> u32 {
    existing
        .iter()
        .filter(|s| {
            s.metadata.name == DEFAULT_SANDBOX_NAME
                && s.metadata.namespace == DEFAULT_SANDBOX_NAMESPACE
        })
        .map(|s| s.metadata.attempt + 1)
        .max()
        .unwrap_or(0)
}
