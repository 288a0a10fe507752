//! Platform-abstracted container filesystem.
//!
//! Presents a uniform, container-rooted file API over three backends chosen
//! once at startup:
//!
//! - **namespace**: the container tree is bind-mounted into the child's
//!   mount namespace at start; host-side operations resolve through the
//!   container root.
//! - **overlay-sim**: isolation is emulated by materializing a private
//!   directory tree (copied or hard-linked from the image rootfs, or a
//!   synthetic skeleton when no image is given).
//! - **minimal**: like overlay-sim, with platform line endings for
//!   synthetic files and case-insensitive `find`.
//!
//! Operations take an opaque container handle plus a POSIX-style absolute
//! path; no operation ever returns a host path to the caller, and every
//! path is confined to the container root (see [`path::confine`]).

mod minimal;
mod namespace;
mod overlay_sim;
pub mod path;
mod registry;
mod tree;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ids::ContainerId;
use crate::probe::BackendKind;
use vessel_shared::{VesselError, VesselResult};

pub(crate) use registry::RootRegistry;

/// Directory entry returned by [`ContainerFs::list`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mode: u32,
    pub modified_ns: i64,
    /// Numeric host owner; surfaced on the namespace backend.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Metadata returned by [`ContainerFs::stat`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileStat {
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mode: u32,
    pub modified_ns: i64,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Writable-tree usage sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct VfsUsage {
    pub used_bytes: u64,
    pub inodes_used: u64,
}

/// Container-rooted file operations.
///
/// One trait, three sealed implementations; callers never see which backend
/// is active beyond [`ContainerFs::backend`].
pub trait ContainerFs: Send + Sync {
    /// The backend variant serving this instance.
    fn backend(&self) -> BackendKind;

    /// Prepare a container root, creating it if absent. Idempotent.
    fn initialize(&self, handle: &ContainerId, image_rootfs: Option<&std::path::Path>)
    -> VesselResult<()>;

    /// Activate the container root for use by a running container.
    fn mount(&self, handle: &ContainerId) -> VesselResult<()>;

    /// Deactivate the container root.
    fn unmount(&self, handle: &ContainerId) -> VesselResult<()>;

    /// Directory entries with metadata. `NotFound` if `path` does not
    /// exist, `InvalidArg` if it is not a directory.
    fn list(&self, handle: &ContainerId, path: &str) -> VesselResult<Vec<DirEntry>>;

    /// Single-pass byte stream over a file.
    fn read(&self, handle: &ContainerId, path: &str) -> VesselResult<Box<dyn Read + Send>>;

    /// Write a file, creating parent directories as needed. The replace is
    /// atomic: data lands in a temporary file renamed into place.
    fn write(&self, handle: &ContainerId, path: &str, bytes: &[u8]) -> VesselResult<()>;

    fn stat(&self, handle: &ContainerId, path: &str) -> VesselResult<FileStat>;

    fn chmod(&self, handle: &ContainerId, path: &str, mode: u32) -> VesselResult<()>;

    fn mkdir(&self, handle: &ContainerId, path: &str, mode: u32) -> VesselResult<()>;

    /// Remove a file or directory tree.
    fn remove(&self, handle: &ContainerId, path: &str) -> VesselResult<()>;

    /// Rename within the same container.
    fn rename(&self, handle: &ContainerId, src: &str, dst: &str) -> VesselResult<()>;

    /// Copy between containers (or within one); recursive for directories,
    /// preserving mode bits.
    fn copy(
        &self,
        src_handle: &ContainerId,
        src_path: &str,
        dst_handle: &ContainerId,
        dst_path: &str,
    ) -> VesselResult<()>;

    /// Container-relative paths under `base` whose file name contains
    /// `name_substring`. Symlinks are never followed.
    fn find(
        &self,
        handle: &ContainerId,
        base: &str,
        name_substring: &str,
        recursive: bool,
    ) -> VesselResult<Vec<String>>;

    /// Per-handle working directory (in-memory).
    fn working_dir(&self, handle: &ContainerId) -> VesselResult<String>;

    /// Set the working directory; the target must exist.
    fn set_working_dir(&self, handle: &ContainerId, path: &str) -> VesselResult<()>;

    /// Usage sample over the container's writable tree.
    fn usage(&self, handle: &ContainerId) -> VesselResult<VfsUsage>;

    /// Release all resources for the handle. Safe to call repeatedly.
    fn cleanup(&self, handle: &ContainerId) -> VesselResult<()>;
}

/// Handle to the selected VFS backend.
///
/// Cheap to clone; all clones share the same per-container root registry.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<dyn ContainerFs>,
    registry: Arc<RootRegistry>,
}

impl Vfs {
    /// Construct the VFS for the selected backend, rooting container trees
    /// under `trees_dir`.
    pub fn create(kind: BackendKind, trees_dir: PathBuf) -> Vfs {
        let registry = Arc::new(RootRegistry::new());
        let inner: Arc<dyn ContainerFs> = match kind {
            BackendKind::Namespace => {
                Arc::new(namespace::NamespaceFs::new(trees_dir, registry.clone()))
            }
            BackendKind::OverlaySim => {
                Arc::new(overlay_sim::OverlaySimFs::new(trees_dir, registry.clone()))
            }
            BackendKind::Minimal => Arc::new(minimal::MinimalFs::new(trees_dir, registry.clone())),
        };
        Vfs { inner, registry }
    }

    /// Host path of the container root, for the isolation engine only.
    ///
    /// Not part of the container-facing contract; the engine needs the real
    /// root to bind and pivot into it.
    pub(crate) fn host_root(&self, handle: &ContainerId) -> VesselResult<PathBuf> {
        self.registry
            .root_of(handle)
            .ok_or_else(|| VesselError::NotFound(format!("no filesystem for container {}", handle)))
    }
}

impl std::ops::Deref for Vfs {
    type Target = dyn ContainerFs;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("backend", &self.inner.backend())
            .finish()
    }
}
