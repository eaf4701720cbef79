//! Staging area for embeddings awaiting insertion.
//!
//! Mutating the index structure has a fixed cost (and training, once the
//! structure is partitioned-ready), so embeddings are collected here and
//! inserted in one batch on flush.

use crate::index::document::DocType;

/// An embedding produced but not yet searchable.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub path: String,
    pub embedding: Vec<f32>,
    pub doc_type: DocType,
    pub content_hash: Option<String>,
    pub timestamp: u64,
}

/// Ordered buffer with a flush capacity.
#[derive(Debug)]
pub struct EmbeddingBuffer {
    capacity: usize,
    pending: Vec<PendingEmbedding>,
}

impl EmbeddingBuffer {
    /// Creates a buffer that asks for a flush once `capacity` entries are staged.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Stages an embedding and returns `true` when the buffer should be flushed.
    ///
    /// A path that is already buffered has its entry replaced in place.
    pub fn stage(&mut self, entry: PendingEmbedding) -> bool {
        match self.pending.iter_mut().find(|p| p.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.pending.push(entry),
        }
        self.is_full()
    }

    /// Drops the buffered entry for `path`.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.path != path);
        self.pending.len() != before
    }

    /// Takes every buffered entry, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<PendingEmbedding> {
        std::mem::take(&mut self.pending)
    }

    /// Puts entries back in front of anything staged since they were drained.
    pub fn restore(&mut self, mut entries: Vec<PendingEmbedding>) {
        entries.retain(|e| !self.pending.iter().any(|p| p.path == e.path));
        entries.append(&mut self.pending);
        self.pending = entries;
    }

    /// The staged entry for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PendingEmbedding> {
        self.pending.iter().find(|p| p.path == path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.pending.iter().any(|p| p.path == path)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
