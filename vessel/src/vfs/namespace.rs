//! Namespace-capable backend.
//!
//! The container tree lives on the host like the simulating backends, but
//! `mount` wires it for the isolation engine: when running privileged, the
//! root becomes a private self-bind so the child can pivot into it
//! directly; rootless children perform the bind inside their own mount
//! namespace instead. Owner and group surface as numeric host ids.

use std::path::Path;
use std::sync::Arc;

use vessel_shared::VesselResult;

use crate::probe::BackendKind;
use crate::vfs::overlay_sim::materialize_root;
use crate::vfs::registry::RootRegistry;
use crate::vfs::tree::{TreeBackend, TreeFs};

pub(crate) struct NamespaceFs {
    tree: TreeFs,
}

impl NamespaceFs {
    pub fn new(trees_dir: std::path::PathBuf, registry: Arc<RootRegistry>) -> Self {
        Self {
            tree: TreeFs::new(trees_dir, registry),
        }
    }
}

impl TreeBackend for NamespaceFs {
    fn tree(&self) -> &TreeFs {
        &self.tree
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Namespace
    }

    fn populate(&self, root: &Path, image_rootfs: Option<&Path>) -> VesselResult<()> {
        materialize_root(root, image_rootfs, "\n")
    }

    fn activate(&self, root: &Path) -> VesselResult<()> {
        bind_private(root)
    }

    fn deactivate(&self, root: &Path) -> VesselResult<()> {
        unbind(root);
        Ok(())
    }

    fn surface_owners(&self) -> bool {
        true
    }
}

/// Make the root a private bind mount of itself.
///
/// pivot_root requires the new root to be a mount point. Only possible with
/// privilege in the current mount namespace; rootless starts defer the bind
/// to the child after it has entered its own user+mount namespaces.
#[cfg(target_os = "linux")]
fn bind_private(root: &Path) -> VesselResult<()> {
    use nix::mount::{MsFlags, mount};

    // SAFETY: geteuid is always safe to call.
    if unsafe { libc::geteuid() } != 0 {
        return Ok(());
    }

    mount(
        Some(root),
        root,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| {
        vessel_shared::VesselError::Internal(format!("bind mount {}: {}", root.display(), e))
    })?;
    mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        vessel_shared::VesselError::Internal(format!(
            "making {} private: {}",
            root.display(),
            e
        ))
    })?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_private(_root: &Path) -> VesselResult<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn unbind(root: &Path) {
    use nix::mount::{MntFlags, umount2};

    // SAFETY: geteuid is always safe to call.
    if unsafe { libc::geteuid() } != 0 {
        return;
    }
    // Lazy detach; the mount may already be gone with the container.
    let _ = umount2(root, MntFlags::MNT_DETACH);
}

#[cfg(not(target_os = "linux"))]
fn unbind(_root: &Path) {}
