//! Image store implementation.
//!
//! Layout under the images directory:
//!
//! ```text
//! images/
//! └── <hex-digest>/
//!     ├── record.json     # ImageRecord, replaced atomically
//!     └── rootfs/         # extracted root filesystem (read-only use)
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use vessel_shared::constants::{dirs, filenames};
use vessel_shared::{VesselError, VesselResult};
use walkdir::WalkDir;

use super::archive;
use super::{ImageRecord, ImageRefCounts};

/// Store-wide filesystem usage sample.
#[derive(Debug, Clone)]
pub struct StoreUsage {
    pub timestamp_ns: i64,
    pub mountpoint: String,
    pub used_bytes: u64,
    pub inodes_used: u64,
}

/// Thread-safe content-addressed image store.
///
/// Reads take the index read lock; `remove` takes the write lock and checks
/// the shared refcount under it, so a removal can never race a concurrent
/// container creation that already acquired its reference.
pub struct ImageStore {
    images_dir: PathBuf,
    index: RwLock<HashMap<String, ImageRecord>>,
    refcounts: ImageRefCounts,
}

impl ImageStore {
    /// Open the store, loading every record under `images_dir`.
    ///
    /// Directories without a readable record are skipped with a warning;
    /// a damaged image must not take the store down.
    pub fn open(images_dir: PathBuf, refcounts: ImageRefCounts) -> VesselResult<Self> {
        std::fs::create_dir_all(&images_dir)?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&images_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let record_path = entry.path().join(filenames::RECORD);
            match std::fs::read(&record_path)
                .map_err(VesselError::from)
                .and_then(|bytes| serde_json::from_slice::<ImageRecord>(&bytes).map_err(Into::into))
            {
                Ok(record) => {
                    index.insert(record.digest.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %record_path.display(),
                        error = %e,
                        "skipping unreadable image record"
                    );
                }
            }
        }

        tracing::debug!(images = index.len(), "opened image store");
        Ok(Self {
            images_dir,
            index: RwLock::new(index),
            refcounts,
        })
    }

    /// Resolve a reference to its record.
    ///
    /// Accepted forms: a repository tag (exact), `sha256:<hex>`, a full hex
    /// digest, or an unambiguous hex prefix of at least 6 characters.
    pub fn get(&self, reference: &str) -> VesselResult<ImageRecord> {
        let index = self.index.read();
        resolve(&index, reference).cloned()
    }

    /// List records, optionally filtered by a substring match against
    /// repository tags. Ordered by creation time, newest first.
    pub fn list(&self, filter: Option<&str>) -> Vec<ImageRecord> {
        let index = self.index.read();
        let mut records: Vec<ImageRecord> = index
            .values()
            .filter(|r| match filter {
                Some(needle) => r.repo_tags.iter().any(|t| t.contains(needle)),
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Remove an image. Fails `InUse` while any container references it.
    pub fn remove(&self, reference: &str) -> VesselResult<()> {
        let mut index = self.index.write();
        let record = resolve(&index, reference)?.clone();

        let live = self.refcounts.count(&record.digest);
        if live > 0 {
            return Err(VesselError::InUse(format!(
                "image {} referenced by {} container(s)",
                record.digest, live
            )));
        }

        let dir = self.images_dir.join(record.hex());
        index.remove(&record.digest);
        drop(index);

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VesselError::Internal(format!(
                    "removing image {}: {}",
                    record.digest, e
                )));
            }
        }
        tracing::info!(digest = %record.digest, "removed image");
        Ok(())
    }

    /// Ingest a tar archive (optionally gzipped) as a new image.
    ///
    /// Re-importing an existing digest merges the tags and is otherwise a
    /// no-op. Tags are unique across the store: an incoming tag is detached
    /// from whichever image held it.
    pub fn import(&self, tarball: &Path, tags: Vec<String>) -> VesselResult<ImageRecord> {
        let hex = archive::digest_file(tarball)?;
        let digest = format!("sha256:{}", hex);
        let size_bytes = std::fs::metadata(tarball)?.len();

        let image_dir = self.images_dir.join(&hex);

        let mut index = self.index.write();

        if !index.contains_key(&digest) {
            // Extract into a staging directory, then claim the final name
            // with a rename so a crashed import leaves no half-image.
            let staging = tempfile::tempdir_in(&self.images_dir)
                .map_err(|e| VesselError::Internal(format!("staging import: {}", e)))?;
            let staged_rootfs = staging.path().join(dirs::ROOTFS);
            std::fs::create_dir_all(&staged_rootfs)?;
            archive::unpack(tarball, &staged_rootfs)?;

            let staged = staging.into_path();
            match std::fs::rename(&staged, &image_dir) {
                Ok(()) => {}
                Err(e) if image_dir.exists() => {
                    // Lost a race against another importer of the same
                    // content; their extraction is identical.
                    tracing::debug!(digest = %digest, error = %e, "import race, reusing extraction");
                    let _ = std::fs::remove_dir_all(&staged);
                }
                Err(e) => {
                    let _ = std::fs::remove_dir_all(&staged);
                    return Err(VesselError::Internal(format!(
                        "claiming image dir {}: {}",
                        image_dir.display(),
                        e
                    )));
                }
            }
        }

        for tag in &tags {
            for other in index.values_mut() {
                other.repo_tags.retain(|t| t != tag);
            }
        }

        let record = match index.get_mut(&digest) {
            Some(existing) => {
                for tag in tags {
                    if !existing.repo_tags.contains(&tag) {
                        existing.repo_tags.push(tag);
                    }
                }
                existing.clone()
            }
            None => {
                let record = ImageRecord {
                    digest: digest.clone(),
                    repo_tags: tags,
                    size_bytes,
                    created_at: Utc::now(),
                };
                index.insert(digest.clone(), record.clone());
                record
            }
        };

        // Persist every record whose tag set changed.
        for r in index.values() {
            persist_record(&self.images_dir, r)?;
        }

        tracing::info!(digest = %record.digest, tags = ?record.repo_tags, "imported image");
        Ok(record)
    }

    /// Attach an additional tag to an existing image.
    pub fn tag(&self, reference: &str, new_tag: &str) -> VesselResult<()> {
        if new_tag.is_empty() {
            return Err(VesselError::InvalidArg("empty tag".into()));
        }
        let mut index = self.index.write();
        let digest = resolve(&index, reference)?.digest.clone();
        for other in index.values_mut() {
            other.repo_tags.retain(|t| t != new_tag);
        }
        let record = index
            .get_mut(&digest)
            .expect("digest resolved above");
        record.repo_tags.push(new_tag.to_string());
        for r in index.values() {
            persist_record(&self.images_dir, r)?;
        }
        Ok(())
    }

    /// Host path of an image's extracted rootfs.
    pub(crate) fn rootfs_path(&self, digest: &str) -> VesselResult<PathBuf> {
        let index = self.index.read();
        let record = resolve(&index, digest)?;
        Ok(self.images_dir.join(record.hex()).join(dirs::ROOTFS))
    }

    /// Sample usage of the whole store directory.
    pub fn fs_usage(&self) -> StoreUsage {
        let mut used_bytes = 0u64;
        let mut inodes_used = 0u64;
        for entry in WalkDir::new(&self.images_dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            inodes_used += 1;
            if let Ok(meta) = entry.metadata()
                && meta.is_file()
            {
                used_bytes += meta.len();
            }
        }
        StoreUsage {
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            mountpoint: self.images_dir.to_string_lossy().into_owned(),
            used_bytes,
            inodes_used,
        }
    }
}

fn resolve<'a>(
    index: &'a HashMap<String, ImageRecord>,
    reference: &str,
) -> VesselResult<&'a ImageRecord> {
    if let Some(record) = index.get(reference) {
        return Ok(record);
    }
    if let Some(record) = index.values().find(|r| r.repo_tags.iter().any(|t| t == reference)) {
        return Ok(record);
    }

    let hex = reference.strip_prefix("sha256:").unwrap_or(reference);
    if hex.len() >= 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut candidates = index.values().filter(|r| r.hex().starts_with(hex));
        if let Some(first) = candidates.next() {
            if candidates.next().is_some() {
                return Err(VesselError::InvalidArg(format!(
                    "ambiguous image reference: {}",
                    reference
                )));
            }
            return Ok(first);
        }
    }

    Err(VesselError::NotFound(format!(
        "no such image: {}",
        reference
    )))
}

fn persist_record(images_dir: &Path, record: &ImageRecord) -> VesselResult<()> {
    let dir = images_dir.join(record.hex());
    std::fs::create_dir_all(&dir)?;
    let mut staged = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| VesselError::Internal(format!("staging image record: {}", e)))?;
    staged.write_all(&serde_json::to_vec_pretty(record)?)?;
    staged
        .persist(dir.join(filenames::RECORD))
        .map_err(|e| VesselError::Internal(format!("committing image record: {}", e)))?;
    Ok(())
}
