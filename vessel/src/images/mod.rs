//! Local content-addressed image store.
//!
//! Images are addressed by the SHA-256 digest of their source archive and
//! carry ordered repository tags, byte size, and creation time. Records are
//! immutable post-ingest; removal fails while any container references the
//! image.

mod archive;
mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use store::{ImageStore, StoreUsage};

/// Persisted image record (`images/<hex>/record.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Content digest, `sha256:<hex>`.
    pub digest: String,
    /// Repository tags, in application order.
    pub repo_tags: Vec<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Hex part of the digest (directory name in the store).
    pub fn hex(&self) -> &str {
        self.digest.strip_prefix("sha256:").unwrap_or(&self.digest)
    }
}

/// Shared image reference counter.
///
/// The supervisor acquires a reference for every container bound to an
/// image; the store consults the counter before removal. Cloning shares the
/// underlying counter.
#[derive(Debug, Clone, Default)]
pub struct ImageRefCounts {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl ImageRefCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, digest: &str) {
        *self.inner.lock().entry(digest.to_string()).or_insert(0) += 1;
    }

    pub fn release(&self, digest: &str) {
        let mut counts = self.inner.lock();
        if let Some(count) = counts.get_mut(digest) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(digest);
            }
        }
    }

    pub fn count(&self, digest: &str) -> usize {
        self.inner.lock().get(digest).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcounts_balance() {
        let counts = ImageRefCounts::new();
        assert_eq!(counts.count("sha256:ab"), 0);
        counts.acquire("sha256:ab");
        counts.acquire("sha256:ab");
        assert_eq!(counts.count("sha256:ab"), 2);
        counts.release("sha256:ab");
        assert_eq!(counts.count("sha256:ab"), 1);
        counts.release("sha256:ab");
        assert_eq!(counts.count("sha256:ab"), 0);
        // Releasing past zero must not underflow.
        counts.release("sha256:ab");
        assert_eq!(counts.count("sha256:ab"), 0);
    }

    #[test]
    fn record_hex_strips_prefix() {
        let record = ImageRecord {
            digest: "sha256:deadbeef".into(),
            repo_tags: vec![],
            size_bytes: 0,
            created_at: Utc::now(),
        };
        assert_eq!(record.hex(), "deadbeef");
    }
}
