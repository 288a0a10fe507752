//! Overlay-simulating backend.
//!
//! For hosts without kernel namespaces: isolation is emulated by
//! materializing a private directory tree per container, seeded from the
//! image rootfs (hard links where the filesystem allows, copies otherwise)
//! or from a synthetic skeleton when no image is given.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use vessel_shared::VesselResult;
use walkdir::WalkDir;

use crate::probe::BackendKind;
use crate::vfs::registry::RootRegistry;
use crate::vfs::tree::{TreeBackend, TreeFs, link_or_copy, mode_of, set_mode};

/// Directories of the synthetic skeleton used when no image rootfs exists.
const SKELETON_DIRS: &[&str] = &["bin", "dev", "etc", "home", "proc", "sys", "tmp", "usr", "var"];

pub(crate) struct OverlaySimFs {
    tree: TreeFs,
}

impl OverlaySimFs {
    pub fn new(trees_dir: std::path::PathBuf, registry: Arc<RootRegistry>) -> Self {
        Self {
            tree: TreeFs::new(trees_dir, registry),
        }
    }
}

impl TreeBackend for OverlaySimFs {
    fn tree(&self) -> &TreeFs {
        &self.tree
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OverlaySim
    }

    fn populate(&self, root: &Path, image_rootfs: Option<&Path>) -> VesselResult<()> {
        materialize_root(root, image_rootfs, "\n")
    }
}

/// Seed a container root from an image rootfs, or synthesize a skeleton.
pub(crate) fn materialize_root(
    root: &Path,
    image_rootfs: Option<&Path>,
    line_ending: &str,
) -> VesselResult<()> {
    match image_rootfs {
        Some(src) => seed_from_image(src, root),
        None => synthesize_skeleton(root, line_ending),
    }
}

/// Materialize the image tree under the container root.
///
/// Regular files are hard-linked when source and target share a filesystem;
/// the image store is immutable post-ingest, so shared inodes are safe for
/// reads and writes replace files atomically rather than editing in place.
fn seed_from_image(src: &Path, root: &Path) -> VesselResult<()> {
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            vessel_shared::VesselError::Internal(format!("walking {}: {}", src.display(), e))
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|e| {
            vessel_shared::VesselError::Internal(format!("strip prefix: {}", e))
        })?;
        let target = root.join(rel);
        let meta = entry.metadata().map_err(|e| {
            vessel_shared::VesselError::Internal(format!(
                "stat {}: {}",
                entry.path().display(),
                e
            ))
        })?;

        if meta.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, mode_of(&meta))?;
        } else if meta.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(windows)]
            let _ = std::os::windows::fs::symlink_file(&link, &target);
        } else {
            link_or_copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Minimal tree for containers created without an image rootfs.
fn synthesize_skeleton(root: &Path, line_ending: &str) -> VesselResult<()> {
    for dir in SKELETON_DIRS {
        fs::create_dir_all(root.join(dir))?;
    }
    fs::write(
        root.join("etc/hostname"),
        format!("vessel{}", line_ending),
    )?;
    fs::write(
        root.join("etc/hosts"),
        format!("127.0.0.1 localhost{}", line_ending),
    )?;
    Ok(())
}
