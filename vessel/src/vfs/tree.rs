//! Shared directory-tree implementation behind the three VFS backends.
//!
//! `TreeFs` owns the mechanics common to every backend (confinement, atomic
//! writes, recursive copy, find, usage sampling). Backends plug in through
//! the sealed [`TreeBackend`] trait: how a fresh root is populated, how a
//! root is activated, and the text/lookup conventions.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vessel_shared::{VesselError, VesselResult};
use walkdir::WalkDir;

use crate::ids::ContainerId;
use crate::probe::BackendKind;
use crate::vfs::path::{confine, to_container_path};
use crate::vfs::registry::RootRegistry;
use crate::vfs::{ContainerFs, DirEntry, FileStat, VfsUsage};

/// Common state of a tree-backed VFS.
pub(crate) struct TreeFs {
    trees_dir: PathBuf,
    registry: Arc<RootRegistry>,
}

impl TreeFs {
    pub fn new(trees_dir: PathBuf, registry: Arc<RootRegistry>) -> Self {
        Self {
            trees_dir,
            registry,
        }
    }

    fn root_path(&self, id: &ContainerId) -> PathBuf {
        self.trees_dir.join(id.as_str())
    }

    fn require_root(&self, id: &ContainerId) -> VesselResult<PathBuf> {
        self.registry
            .root_of(id)
            .ok_or_else(|| VesselError::NotFound(format!("no filesystem for container {}", id)))
    }

    fn resolve(&self, id: &ContainerId, path: &str) -> VesselResult<PathBuf> {
        let root = self.require_root(id)?;
        confine(&root, path)
    }
}

/// Backend hooks; implementations are the three sealed variants.
pub(crate) trait TreeBackend: Send + Sync {
    fn tree(&self) -> &TreeFs;

    fn kind(&self) -> BackendKind;

    /// Populate a freshly created, empty root directory.
    fn populate(&self, root: &Path, image_rootfs: Option<&Path>) -> VesselResult<()>;

    /// Activation hook run by `mount` after the root has been validated.
    fn activate(&self, _root: &Path) -> VesselResult<()> {
        Ok(())
    }

    /// Deactivation hook run by `unmount`.
    fn deactivate(&self, _root: &Path) -> VesselResult<()> {
        Ok(())
    }

    /// Whether `find` matches file names case-insensitively.
    fn case_insensitive_find(&self) -> bool {
        false
    }

    /// Whether entries carry numeric host owner ids.
    fn surface_owners(&self) -> bool {
        false
    }
}

impl<B: TreeBackend> ContainerFs for B {
    fn backend(&self) -> BackendKind {
        self.kind()
    }

    fn initialize(&self, handle: &ContainerId, image_rootfs: Option<&Path>) -> VesselResult<()> {
        let tree = self.tree();
        let root = tree.root_path(handle);

        if !root.exists() {
            if let Some(src) = image_rootfs
                && !src.exists()
            {
                return Err(VesselError::NotFound(format!(
                    "image rootfs missing: {}",
                    src.display()
                )));
            }
            fs::create_dir_all(&root)?;
            if let Err(e) = self.populate(&root, image_rootfs) {
                // Half-populated roots must not survive a failed initialize.
                let _ = fs::remove_dir_all(&root);
                return Err(e);
            }
        }

        tree.registry.insert(handle, root);
        tracing::debug!(container_id = %handle, backend = %self.kind(), "initialized container root");
        Ok(())
    }

    fn mount(&self, handle: &ContainerId) -> VesselResult<()> {
        let tree = self.tree();
        let root = tree.require_root(handle)?;
        if !root.is_dir() {
            return Err(VesselError::NotFound(format!(
                "container root missing for {}",
                handle
            )));
        }
        self.activate(&root)?;
        tree.registry.set_mounted(handle, true);
        Ok(())
    }

    fn unmount(&self, handle: &ContainerId) -> VesselResult<()> {
        let tree = self.tree();
        if let Some(root) = tree.registry.root_of(handle) {
            self.deactivate(&root)?;
            tree.registry.set_mounted(handle, false);
        }
        Ok(())
    }

    fn list(&self, handle: &ContainerId, path: &str) -> VesselResult<Vec<DirEntry>> {
        let host = self.tree().resolve(handle, path)?;
        let meta = fs::symlink_metadata(&host)
            .map_err(|_| VesselError::NotFound(format!("no such path: {}", path)))?;
        if !meta.is_dir() {
            return Err(VesselError::InvalidArg(format!(
                "not a directory: {}",
                path
            )));
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&host)? {
            let dirent = dirent?;
            let meta = dirent.metadata()?;
            entries.push(DirEntry {
                name: dirent.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                is_symlink: meta.is_symlink(),
                size: meta.len(),
                mode: mode_of(&meta),
                modified_ns: modified_ns(&meta),
                uid: self.surface_owners().then(|| owner_uid(&meta)).flatten(),
                gid: self.surface_owners().then(|| owner_gid(&meta)).flatten(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read(&self, handle: &ContainerId, path: &str) -> VesselResult<Box<dyn Read + Send>> {
        let host = self.tree().resolve(handle, path)?;
        let meta = fs::symlink_metadata(&host)
            .map_err(|_| VesselError::NotFound(format!("no such file: {}", path)))?;
        if meta.is_dir() {
            return Err(VesselError::InvalidArg(format!("is a directory: {}", path)));
        }
        let file = fs::File::open(&host)?;
        Ok(Box::new(file))
    }

    fn write(&self, handle: &ContainerId, path: &str, bytes: &[u8]) -> VesselResult<()> {
        let host = self.tree().resolve(handle, path)?;
        if host.is_dir() {
            return Err(VesselError::InvalidArg(format!("is a directory: {}", path)));
        }
        let parent = host
            .parent()
            .ok_or_else(|| VesselError::InvalidArg(format!("cannot write to {}", path)))?;
        ensure_dir(parent, path)?;

        let mut staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| VesselError::Internal(format!("staging write for {}: {}", path, e)))?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged
            .persist(&host)
            .map_err(|e| VesselError::Internal(format!("committing write for {}: {}", path, e)))?;
        Ok(())
    }

    fn stat(&self, handle: &ContainerId, path: &str) -> VesselResult<FileStat> {
        let host = self.tree().resolve(handle, path)?;
        let meta = fs::symlink_metadata(&host)
            .map_err(|_| VesselError::NotFound(format!("no such path: {}", path)))?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            is_symlink: meta.is_symlink(),
            size: meta.len(),
            mode: mode_of(&meta),
            modified_ns: modified_ns(&meta),
            uid: self.surface_owners().then(|| owner_uid(&meta)).flatten(),
            gid: self.surface_owners().then(|| owner_gid(&meta)).flatten(),
        })
    }

    fn chmod(&self, handle: &ContainerId, path: &str, mode: u32) -> VesselResult<()> {
        let host = self.tree().resolve(handle, path)?;
        if !host.exists() {
            return Err(VesselError::NotFound(format!("no such path: {}", path)));
        }
        set_mode(&host, mode)
    }

    fn mkdir(&self, handle: &ContainerId, path: &str, mode: u32) -> VesselResult<()> {
        let host = self.tree().resolve(handle, path)?;
        if host.exists() {
            return Err(VesselError::AlreadyExists(format!(
                "path already exists: {}",
                path
            )));
        }
        fs::create_dir(&host).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VesselError::NotFound(format!("parent missing for {}", path))
            }
            std::io::ErrorKind::NotADirectory => {
                VesselError::InvalidArg(format!("not a directory in path: {}", path))
            }
            _ => VesselError::from(e),
        })?;
        set_mode(&host, mode)
    }

    fn remove(&self, handle: &ContainerId, path: &str) -> VesselResult<()> {
        let host = self.tree().resolve(handle, path)?;
        let meta = fs::symlink_metadata(&host)
            .map_err(|_| VesselError::NotFound(format!("no such path: {}", path)))?;
        if meta.is_dir() {
            fs::remove_dir_all(&host)?;
        } else {
            fs::remove_file(&host)?;
        }
        Ok(())
    }

    fn rename(&self, handle: &ContainerId, src: &str, dst: &str) -> VesselResult<()> {
        let tree = self.tree();
        let from = tree.resolve(handle, src)?;
        if fs::symlink_metadata(&from).is_err() {
            return Err(VesselError::NotFound(format!("no such path: {}", src)));
        }
        let to = tree.resolve(handle, dst)?;
        if let Some(parent) = to.parent() {
            ensure_dir(parent, dst)?;
        }
        fs::rename(&from, &to)?;
        Ok(())
    }

    fn copy(
        &self,
        src_handle: &ContainerId,
        src_path: &str,
        dst_handle: &ContainerId,
        dst_path: &str,
    ) -> VesselResult<()> {
        let tree = self.tree();
        let from = tree.resolve(src_handle, src_path)?;
        let meta = fs::symlink_metadata(&from)
            .map_err(|_| VesselError::NotFound(format!("no such path: {}", src_path)))?;
        let to = tree.resolve(dst_handle, dst_path)?;
        if let Some(parent) = to.parent() {
            ensure_dir(parent, dst_path)?;
        }

        if meta.is_dir() {
            copy_tree(&from, &to)
        } else {
            fs::copy(&from, &to)?;
            set_mode(&to, mode_of(&meta))
        }
    }

    fn find(
        &self,
        handle: &ContainerId,
        base: &str,
        name_substring: &str,
        recursive: bool,
    ) -> VesselResult<Vec<String>> {
        let root = self.tree().require_root(handle)?;
        let start = self.tree().resolve(handle, base)?;
        if !start.is_dir() {
            return Err(VesselError::NotFound(format!(
                "no such directory: {}",
                base
            )));
        }

        let case_insensitive = self.case_insensitive_find();
        let needle = if case_insensitive {
            name_substring.to_lowercase()
        } else {
            name_substring.to_string()
        };

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut matches = Vec::new();
        // follow_links stays off: symlinks pointing out of the root must
        // never be traversed.
        for entry in WalkDir::new(&start)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            let name = entry.file_name().to_string_lossy();
            let haystack = if case_insensitive {
                name.to_lowercase()
            } else {
                name.into_owned()
            };
            if haystack.contains(&needle) {
                matches.push(to_container_path(&root, entry.path()));
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn working_dir(&self, handle: &ContainerId) -> VesselResult<String> {
        self.tree()
            .registry
            .working_dir(handle)
            .ok_or_else(|| VesselError::NotFound(format!("no filesystem for container {}", handle)))
    }

    fn set_working_dir(&self, handle: &ContainerId, path: &str) -> VesselResult<()> {
        let host = self.tree().resolve(handle, path)?;
        if !host.is_dir() {
            return Err(VesselError::NotFound(format!(
                "no such directory: {}",
                path
            )));
        }
        self.tree().registry.set_working_dir(handle, path.to_string());
        Ok(())
    }

    fn usage(&self, handle: &ContainerId) -> VesselResult<VfsUsage> {
        let root = self.tree().require_root(handle)?;
        let mut usage = VfsUsage::default();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            usage.inodes_used += 1;
            if let Ok(meta) = entry.metadata()
                && meta.is_file()
            {
                usage.used_bytes += meta.len();
            }
        }
        Ok(usage)
    }

    fn cleanup(&self, handle: &ContainerId) -> VesselResult<()> {
        let tree = self.tree();
        let root = match tree.registry.remove(handle) {
            Some(entry) => {
                let _ = self.deactivate(&entry.root);
                entry.root
            }
            // Not registered (second cleanup, or recovery without
            // initialize); still sweep the on-disk tree.
            None => tree.root_path(handle),
        };
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VesselError::Internal(format!(
                    "removing container tree {}: {}",
                    root.display(),
                    e
                )));
            }
        }
        Ok(())
    }
}

/// Create intermediate directories; a file in the way is the caller's
/// path being invalid, not an internal fault.
fn ensure_dir(dir: &Path, container_path: &str) -> VesselResult<()> {
    fs::create_dir_all(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotADirectory | std::io::ErrorKind::AlreadyExists => {
            VesselError::InvalidArg(format!("not a directory in path: {}", container_path))
        }
        _ => VesselError::from(e),
    })
}

/// Recursive copy preserving mode bits. Symlinks are recreated, not
/// followed.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> VesselResult<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| VesselError::Internal(format!("walking {}: {}", src.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| VesselError::Internal(e.to_string()))?;
        let target = dst.join(rel);
        let meta = entry
            .metadata()
            .map_err(|e| VesselError::Internal(format!("stat {}: {}", entry.path().display(), e)))?;

        if meta.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, mode_of(&meta))?;
        } else if meta.is_symlink() {
            recreate_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            set_mode(&target, mode_of(&meta))?;
        }
    }
    Ok(())
}

/// Copy a file, trying a hard link first. Used when materializing a
/// container tree from an immutable image rootfs.
pub(crate) fn link_or_copy(src: &Path, dst: &Path) -> VesselResult<()> {
    if fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)?;
    if let Ok(meta) = fs::metadata(src) {
        set_mode(dst, mode_of(&meta))?;
    }
    Ok(())
}

fn recreate_symlink(src: &Path, dst: &Path) -> VesselResult<()> {
    let target = fs::read_link(src)?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(&target, dst)?;
    #[cfg(windows)]
    {
        // Treat every link as a file link; directory links need privileges
        // that simulated trees cannot assume.
        let _ = std::os::windows::fs::symlink_file(&target, dst);
    }
    Ok(())
}

pub(crate) fn mode_of(meta: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        if meta.permissions().readonly() { 0o444 } else { 0o666 }
    }
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> VesselResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn modified_ns(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn owner_uid(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.uid())
}

#[cfg(unix)]
fn owner_gid(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.gid())
}

#[cfg(not(unix))]
fn owner_uid(_meta: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(not(unix))]
fn owner_gid(_meta: &fs::Metadata) -> Option<u32> {
    None
}
