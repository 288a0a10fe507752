//! Data-directory layout.

use std::path::{Path, PathBuf};

use vessel_shared::constants::dirs;

/// Paths under the state root.
///
/// ```text
/// {data_dir}/
/// ├── containers/<id>/   spec, status, log
/// ├── sandboxes/<id>/    spec, status
/// ├── images/<digest>/   record.json, rootfs/
/// ├── trees/<id>/        materialized container roots
/// └── .lock
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join(dirs::CONTAINERS)
    }

    pub fn sandboxes_dir(&self) -> PathBuf {
        self.data_dir.join(dirs::SANDBOXES)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join(dirs::IMAGES)
    }

    pub fn trees_dir(&self) -> PathBuf {
        self.data_dir.join(dirs::TREES)
    }

    /// Create the directory skeleton.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.containers_dir())?;
        std::fs::create_dir_all(self.sandboxes_dir())?;
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.trees_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prepare_creates_skeleton() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().join("state"));
        layout.prepare().unwrap();
        assert!(layout.containers_dir().is_dir());
        assert!(layout.sandboxes_dir().is_dir());
        assert!(layout.images_dir().is_dir());
        assert!(layout.trees_dir().is_dir());
    }
}
