//! Durable record store.
//!
//! Layout under the data directory:
//!
//! ```text
//! containers/<id>/   spec, status, log
//! sandboxes/<id>/    spec, status
//! images/<digest>/   record.json, rootfs/
//! ```
//!
//! `spec` is written once at creation; `status` is replaced atomically
//! (temp file + rename) on every state transition, so a crash can never be
//! observed mid-write.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use vessel_shared::constants::{dirs, filenames};
use vessel_shared::{VesselError, VesselResult};

/// Which record family a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Container,
    Sandbox,
}

impl RecordKind {
    fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Container => dirs::CONTAINERS,
            RecordKind::Sandbox => dirs::SANDBOXES,
        }
    }
}

/// File-backed store for container and sandbox records.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: PathBuf) -> VesselResult<Self> {
        std::fs::create_dir_all(root.join(dirs::CONTAINERS))?;
        std::fs::create_dir_all(root.join(dirs::SANDBOXES))?;
        Ok(Self { root })
    }

    pub fn record_dir(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(id)
    }

    /// Captured stdout/stderr of a container's entrypoint.
    pub fn log_path(&self, container_id: &str) -> PathBuf {
        self.record_dir(RecordKind::Container, container_id)
            .join(filenames::LOG)
    }

    /// Write the creation-time spec document.
    pub fn save_spec<T: Serialize>(&self, kind: RecordKind, id: &str, doc: &T) -> VesselResult<()> {
        let dir = self.record_dir(kind, id);
        std::fs::create_dir_all(&dir)?;
        write_doc(&dir.join(filenames::SPEC), doc)
    }

    /// Replace the status document atomically.
    pub fn save_status<T: Serialize>(
        &self,
        kind: RecordKind,
        id: &str,
        doc: &T,
    ) -> VesselResult<()> {
        let dir = self.record_dir(kind, id);
        std::fs::create_dir_all(&dir)?;
        write_doc(&dir.join(filenames::STATUS), doc)
    }

    pub fn load_spec<T: DeserializeOwned>(&self, kind: RecordKind, id: &str) -> VesselResult<T> {
        read_doc(&self.record_dir(kind, id).join(filenames::SPEC))
    }

    pub fn load_status<T: DeserializeOwned>(&self, kind: RecordKind, id: &str) -> VesselResult<T> {
        read_doc(&self.record_dir(kind, id).join(filenames::STATUS))
    }

    /// IDs of all persisted records of a kind.
    pub fn list_ids(&self, kind: RecordKind) -> VesselResult<Vec<String>> {
        let dir = self.root.join(kind.dir_name());
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete a record directory (spec, status, and any log).
    pub fn remove_record(&self, kind: RecordKind, id: &str) -> VesselResult<()> {
        let dir = self.record_dir(kind, id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VesselError::Internal(format!(
                "removing record {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

fn write_doc<T: Serialize>(path: &Path, doc: &T) -> VesselResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| VesselError::Internal(format!("no parent for {}", path.display())))?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| VesselError::Internal(format!("staging {}: {}", path.display(), e)))?;
    staged.write_all(&serde_json::to_vec_pretty(doc)?)?;
    staged.flush()?;
    staged
        .persist(path)
        .map_err(|e| VesselError::Internal(format!("committing {}: {}", path.display(), e)))?;
    Ok(())
}

fn read_doc<T: DeserializeOwned>(path: &Path) -> VesselResult<T> {
    let bytes = std::fs::read(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VesselError::NotFound(format!("no record at {}", path.display()))
            }
            _ => VesselError::from(e),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        VesselError::Internal(format!("corrupt record {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;
    use vessel_shared::ErrorKind;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        value: u32,
    }

    #[test]
    fn spec_and_status_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();

        store
            .save_spec(RecordKind::Container, "c1", &Doc { value: 1 })
            .unwrap();
        store
            .save_status(RecordKind::Container, "c1", &Doc { value: 2 })
            .unwrap();

        let spec: Doc = store.load_spec(RecordKind::Container, "c1").unwrap();
        let status: Doc = store.load_status(RecordKind::Container, "c1").unwrap();
        assert_eq!(spec, Doc { value: 1 });
        assert_eq!(status, Doc { value: 2 });
    }

    #[test]
    fn status_replacement_is_total() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        for i in 0..20 {
            store
                .save_status(RecordKind::Sandbox, "s1", &Doc { value: i })
                .unwrap();
        }
        let last: Doc = store.load_status(RecordKind::Sandbox, "s1").unwrap();
        assert_eq!(last.value, 19);
    }

    #[test]
    fn list_ids_reflects_saved_records() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        store
            .save_spec(RecordKind::Container, "b", &Doc { value: 0 })
            .unwrap();
        store
            .save_spec(RecordKind::Container, "a", &Doc { value: 0 })
            .unwrap();
        assert_eq!(store.list_ids(RecordKind::Container).unwrap(), vec!["a", "b"]);
        assert!(store.list_ids(RecordKind::Sandbox).unwrap().is_empty());
    }

    #[test]
    fn missing_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        let err = store
            .load_spec::<Doc>(RecordKind::Container, "ghost")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn remove_record_twice_is_ok() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        store
            .save_spec(RecordKind::Container, "c1", &Doc { value: 1 })
            .unwrap();
        store.remove_record(RecordKind::Container, "c1").unwrap();
        store.remove_record(RecordKind::Container, "c1").unwrap();
    }
}
