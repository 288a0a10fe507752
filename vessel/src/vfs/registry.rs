//! Per-container root registry.
//!
//! One owning map keyed by typed container ID (arena-plus-index style);
//! everything else refers to containers by ID only.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::ids::ContainerId;

#[derive(Debug, Clone)]
pub(crate) struct RootEntry {
    pub root: PathBuf,
    pub working_dir: String,
    pub mounted: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RootRegistry {
    entries: Mutex<HashMap<ContainerId, RootEntry>>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &ContainerId, root: PathBuf) {
        let mut entries = self.entries.lock();
        entries.entry(id.clone()).or_insert(RootEntry {
            root,
            working_dir: "/".to_string(),
            mounted: false,
        });
    }

    pub fn remove(&self, id: &ContainerId) -> Option<RootEntry> {
        self.entries.lock().remove(id)
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn root_of(&self, id: &ContainerId) -> Option<PathBuf> {
        self.entries.lock().get(id).map(|e| e.root.clone())
    }

    pub fn working_dir(&self, id: &ContainerId) -> Option<String> {
        self.entries.lock().get(id).map(|e| e.working_dir.clone())
    }

    pub fn set_working_dir(&self, id: &ContainerId, dir: String) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.working_dir = dir;
                true
            }
            None => false,
        }
    }

    pub fn set_mounted(&self, id: &ContainerId, mounted: bool) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.mounted = mounted;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let reg = RootRegistry::new();
        let id = ContainerId::generate();
        reg.insert(&id, PathBuf::from("/tmp/a"));
        reg.insert(&id, PathBuf::from("/tmp/b"));
        // First registration wins; re-initialize must not relocate the root.
        assert_eq!(reg.root_of(&id), Some(PathBuf::from("/tmp/a")));
    }

    #[test]
    fn working_dir_defaults_to_root() {
        let reg = RootRegistry::new();
        let id = ContainerId::generate();
        reg.insert(&id, PathBuf::from("/tmp/a"));
        assert_eq!(reg.working_dir(&id).as_deref(), Some("/"));
        assert!(reg.set_working_dir(&id, "/srv".into()));
        assert_eq!(reg.working_dir(&id).as_deref(), Some("/srv"));
    }

    #[test]
    fn remove_twice_is_safe() {
        let reg = RootRegistry::new();
        let id = ContainerId::generate();
        reg.insert(&id, PathBuf::from("/tmp/a"));
        assert!(reg.remove(&id).is_some());
        assert!(reg.remove(&id).is_none());
    }
}
