//! Vessel - container runtime core.
//!
//! Creates, runs, and supervises isolated processes from content-addressed
//! images. The crate is organized leaves-first:
//!
//! - [`probe`] detects host isolation facilities and selects a backend
//! - [`images`] is the local content-addressed image store
//! - [`vfs`] presents container-rooted file operations over three backends
//! - [`isolation`] builds namespaced child processes
//! - [`supervisor`] owns container lifecycle, reaping, logs, and exec
//! - [`sandbox`] groups containers into pod sandboxes
//! - [`cri`] serves the Container Runtime Interface over a local socket
//! - [`runtime`] ties the subsystems together behind [`runtime::VesselRuntime`]

pub mod cri;
pub mod ids;
pub mod images;
pub mod isolation;
pub mod logging;
pub mod probe;
pub mod runtime;
pub mod sandbox;
pub mod state;
pub mod supervisor;
pub mod vfs;

pub use ids::{ContainerId, SandboxId};
pub use runtime::{VesselOptions, VesselRuntime};
pub use vessel_shared::{ErrorKind, VesselError, VesselResult};
