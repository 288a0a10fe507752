//! Minimal backend.
//!
//! For hosts offering neither namespaces nor overlay support. Behaves like
//! the overlay simulator with the platform's line-ending convention for
//! synthetic files, and case-insensitive `find` on Windows-like hosts.

use std::path::Path;
use std::sync::Arc;

use vessel_shared::VesselResult;

use crate::probe::BackendKind;
use crate::vfs::overlay_sim::materialize_root;
use crate::vfs::registry::RootRegistry;
use crate::vfs::tree::{TreeBackend, TreeFs};

const LINE_ENDING: &str = if cfg!(windows) { "\r\n" } else { "\n" };

pub(crate) struct MinimalFs {
    tree: TreeFs,
}

impl MinimalFs {
    pub fn new(trees_dir: std::path::PathBuf, registry: Arc<RootRegistry>) -> Self {
        Self {
            tree: TreeFs::new(trees_dir, registry),
        }
    }
}

impl TreeBackend for MinimalFs {
    fn tree(&self) -> &TreeFs {
        &self.tree
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Minimal
    }

    fn populate(&self, root: &Path, image_rootfs: Option<&Path>) -> VesselResult<()> {
        materialize_root(root, image_rootfs, LINE_ENDING)
    }

    fn case_insensitive_find(&self) -> bool {
        cfg!(windows)
    }
}
