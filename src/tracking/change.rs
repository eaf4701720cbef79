//! Content-hash change detection.
//!
//! Gates re-embedding: a file is only embedded again when the SHA-256 of
//! its content differs from the digest recorded at its last indexing.

use std::collections::BTreeMap;

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Path to digest table of last-indexed content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDetector {
    hashes: BTreeMap<String, String>,
}

impl ChangeDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a digest table saved in a snapshot.
    #[must_use]
    pub fn from_hashes(hashes: BTreeMap<String, String>) -> Self {
        Self { hashes }
    }

    /// Records the digest of `content` and reports whether it changed.
    ///
    /// Returns `true` when `path` is unknown or its digest differs; the new
    /// digest is stored in that case. Returns `false` for identical content.
    pub fn file_changed(&mut self, path: &str, content: &str) -> bool {
        let digest = calculate_hash(content);
        match self.hashes.get(path) {
            Some(stored) if *stored == digest => false,
            _ => {
                self.hashes.insert(path.to_string(), digest);
                true
            }
        }
    }

    /// Deletes the digest of a file that left the tracked set.
    pub fn remove(&mut self, path: &str) -> bool {
        self.hashes.remove(path).is_some()
    }

    /// Drops a digest recorded for content whose embedding failed, so the
    /// next notification for `path` is treated as a change.
    pub fn forget(&mut self, path: &str) {
        self.hashes.remove(path);
    }

    #[must_use]
    pub fn digest(&self, path: &str) -> Option<&str> {
        self.hashes.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }

    #[must_use]
    pub fn hashes(&self) -> &BTreeMap<String, String> {
        &self.hashes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
