//! The tracked index: change gate, buffer, store and snapshot in one owner.
//!
//! All mutations (stage, flush, upgrade, save, remove) run under the write
//! half of one `RwLock`. Search takes an upgradable read: with an empty
//! buffer it proceeds as a shared read, otherwise it upgrades, flushes and
//! downgrades. Embedding runs outside the lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::index::buffer::{EmbeddingBuffer, PendingEmbedding};
use crate::index::document::{DocType, Document};
use crate::index::snapshot::{self, SnapshotSource};
use crate::index::store::IndexStore;
use crate::tracking::{ChangeDetector, calculate_hash, get_utc_timestamp};
use crate::vector::{EmbeddingGenerator, Score, StructureKind};

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    /// `1 / (1 + distance)`, in `(0, 1]`
    pub similarity: f32,
    /// Euclidean distance to the query embedding
    pub distance: f32,
    pub doc_type: DocType,
    pub timestamp: u64,
}

/// Restrictions applied to a text search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Only documents of this type are ranked
    pub doc_type: Option<DocType>,
    /// Hits below this similarity are dropped
    pub min_similarity: Option<f32>,
}

/// Result of offering content to the index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    /// Content matched the last indexed digest; nothing was embedded
    Unchanged,
    /// Embedded and buffered
    Staged,
    /// Embedded, and the buffer reached capacity and was flushed
    Flushed(FlushReport),
}

/// What a flush did.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub inserted: usize,
    pub replaced: usize,
    pub upgraded: bool,
    pub upgrade_error: Option<String>,
    pub saved: bool,
    /// Set when the snapshot could not be written; retried on the next flush
    pub save_error: Option<String>,
    pub vector_count: usize,
    pub structure_kind: StructureKind,
}

/// Point-in-time summary of the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub index_dir: PathBuf,
    pub model_name: String,
    pub dimension: usize,
    pub structure_kind: StructureKind,
    pub trained: bool,
    pub partitions: usize,
    pub vector_count: usize,
    pub buffered: usize,
    pub tracked_files: usize,
    pub generation: u64,
    pub type_counts: BTreeMap<DocType, usize>,
}

struct IndexState {
    store: IndexStore,
    buffer: EmbeddingBuffer,
    detector: ChangeDetector,
    generation: u64,
    created_at: u64,
    /// Removals not yet persisted
    dirty: bool,
}

/// Incremental vector index over a tracked folder.
pub struct TrackedIndex {
    state: RwLock<IndexState>,
    generator: Box<dyn EmbeddingGenerator>,
    dir: PathBuf,
}

impl TrackedIndex {
    /// Loads the snapshot in the configured index directory, or starts empty.
    ///
    /// An unusable snapshot is logged and ignored; only invalid settings or
    /// a generator of the wrong dimension fail.
    pub fn open(settings: &Settings, generator: Box<dyn EmbeddingGenerator>) -> IndexResult<Self> {
        settings
            .validate()
            .map_err(|reason| IndexError::ConfigError { reason })?;

        let config = &settings.index;
        let generator_dim = generator.dimension().get();
        if generator_dim != config.dimension {
            tracing::error!(
                "embedding model {} produces {generator_dim} dimensions, index expects {}",
                generator.model_name(),
                config.dimension
            );
            return Err(IndexError::DimensionMismatch {
                expected: config.dimension,
                actual: generator_dim,
            });
        }

        let dir = settings.index_dir();
        let restored = match snapshot::load(&dir, config, generator.model_name()) {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    "loaded index from {}: {} vectors ({})",
                    dir.display(),
                    snapshot.store.vector_count(),
                    snapshot.store.structure_kind()
                );
                Some(snapshot)
            }
            Ok(None) => {
                tracing::debug!("no snapshot in {}, starting empty", dir.display());
                None
            }
            Err(e) => {
                tracing::warn!("ignoring unusable snapshot, starting with an empty index: {e}");
                None
            }
        };

        let state = match restored {
            Some(snapshot) => IndexState {
                store: snapshot.store,
                buffer: EmbeddingBuffer::new(config.buffer_size),
                detector: snapshot.detector,
                generation: snapshot.generation,
                created_at: snapshot.created_at,
                dirty: false,
            },
            None => IndexState {
                store: IndexStore::new(config)?,
                buffer: EmbeddingBuffer::new(config.buffer_size),
                detector: ChangeDetector::new(),
                generation: 0,
                created_at: get_utc_timestamp(),
                dirty: false,
            },
        };

        Ok(Self {
            state: RwLock::new(state),
            generator,
            dir,
        })
    }

    /// Loads the embedding model now instead of on first use.
    pub fn warm_up(&self) -> IndexResult<()> {
        self.generator
            .prepare()
            .map_err(|e| IndexError::EmbeddingFailed {
                target: self.generator.model_name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Reports whether `content` differs from what was last indexed for `path`.
    pub fn notify_changed(&self, path: &str, content: &str) -> bool {
        self.state.write().detector.file_changed(path, content)
    }

    /// Embeds `content` and stages it, flushing when the buffer is full.
    ///
    /// On embedding failure the file's digest is dropped so the next
    /// notification retries it.
    pub fn index(
        &self,
        path: &str,
        content: &str,
        doc_type: impl Into<DocType>,
    ) -> IndexResult<IndexOutcome> {
        let embedding = match self.embed_one(content) {
            Ok(embedding) => embedding,
            Err(reason) => {
                self.state.write().detector.forget(path);
                tracing::warn!("skipping {path}: embedding failed: {reason}");
                return Err(IndexError::EmbeddingFailed {
                    target: path.to_string(),
                    reason,
                });
            }
        };

        let mut state = self.state.write();
        state.detector.file_changed(path, content);
        self.stage_locked(
            &mut state,
            PendingEmbedding {
                path: path.to_string(),
                embedding,
                doc_type: doc_type.into(),
                content_hash: Some(calculate_hash(content)),
                timestamp: get_utc_timestamp(),
            },
        )
    }

    /// Gates `content` through the change detector and indexes it if changed.
    pub fn ingest(
        &self,
        path: &str,
        content: &str,
        doc_type: impl Into<DocType>,
    ) -> IndexResult<IndexOutcome> {
        if !self.notify_changed(path, content) {
            tracing::debug!("{path} unchanged, skipping");
            return Ok(IndexOutcome::Unchanged);
        }
        self.index(path, content, doc_type)
    }

    /// Buffers a caller-supplied embedding.
    ///
    /// An embedding of the wrong length is rejected with `DimensionMismatch`.
    pub fn stage(
        &self,
        path: &str,
        embedding: Vec<f32>,
        doc_type: impl Into<DocType>,
    ) -> IndexResult<()> {
        let mut state = self.state.write();
        let expected = state.store.dimension().get();
        if embedding.len() != expected {
            tracing::error!(
                "rejecting embedding for {path}: {} values, index dimension is {expected}",
                embedding.len()
            );
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let content_hash = state.detector.digest(path).map(str::to_string);
        self.stage_locked(
            &mut state,
            PendingEmbedding {
                path: path.to_string(),
                embedding,
                doc_type: doc_type.into(),
                content_hash,
                timestamp: get_utc_timestamp(),
            },
        )
        .map(|_| ())
    }

    /// Removes `path` from the buffer, the store and the digest table.
    ///
    /// The removal is persisted by the next flush or close.
    pub fn remove(&self, path: &str) -> bool {
        let mut state = self.state.write();
        let buffered = state.buffer.remove(path);
        let stored = state.store.remove(path).is_some();
        let tracked = state.detector.remove(path);
        if stored || tracked {
            state.dirty = true;
        }
        if stored {
            tracing::debug!("removed {path} from index");
        }
        buffered || stored || tracked
    }

    /// Inserts buffered embeddings and saves the snapshot.
    pub fn flush(&self) -> IndexResult<FlushReport> {
        let mut state = self.state.write();
        self.flush_locked(&mut state)
    }

    /// Final flush and save.
    pub fn close(self) -> IndexResult<()> {
        let report = self.flush()?;
        match report.save_error {
            Some(reason) => Err(IndexError::Persistence {
                path: self.dir,
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Up to `k` documents most similar to `query`, best first.
    ///
    /// Pending embeddings are flushed first. Embedding failures are logged
    /// and yield no results.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        self.search_filtered(query, k, &SearchFilter::default())
    }

    /// Like [`TrackedIndex::search`], ranking only documents of `doc_type`.
    ///
    /// The type restriction is applied before ranking, so up to `k`
    /// matching documents are returned whenever that many exist.
    pub fn search_by_type(
        &self,
        query: &str,
        doc_type: impl Into<DocType>,
        k: usize,
    ) -> Vec<SearchHit> {
        let filter = SearchFilter {
            doc_type: Some(doc_type.into()),
            ..SearchFilter::default()
        };
        self.search_filtered(query, k, &filter)
    }

    /// Hits of [`TrackedIndex::search`] with at least `min_similarity`.
    pub fn search_with_threshold(
        &self,
        query: &str,
        k: usize,
        min_similarity: f32,
    ) -> Vec<SearchHit> {
        let filter = SearchFilter {
            min_similarity: Some(min_similarity),
            ..SearchFilter::default()
        };
        self.search_filtered(query, k, &filter)
    }

    /// Text search with an optional type restriction and similarity floor.
    pub fn search_filtered(&self, query: &str, k: usize, filter: &SearchFilter) -> Vec<SearchHit> {
        let mut hits = self.search_text(query, k, filter.doc_type.as_ref());
        if let Some(min) = filter.min_similarity {
            hits.retain(|hit| hit.similarity >= min);
        }
        hits
    }

    /// Ranks documents against a caller-supplied query embedding.
    pub fn search_vector(&self, embedding: &[f32], k: usize) -> IndexResult<Vec<SearchHit>> {
        let state = self.flushed_read();
        state.store.search(embedding, k, None).map(to_hits)
    }

    fn search_text(&self, query: &str, k: usize, doc_type: Option<&DocType>) -> Vec<SearchHit> {
        if self.flushed_read().store.is_empty() {
            return Vec::new();
        }

        let embedding = match self.embed_one(query) {
            Ok(embedding) => embedding,
            Err(reason) => {
                tracing::warn!("query embedding failed, returning no results: {reason}");
                return Vec::new();
            }
        };

        let state = self.state.read();
        match state.store.search(&embedding, k, doc_type) {
            Ok(found) => to_hits(found),
            Err(e) => {
                tracing::error!("search failed: {e}");
                Vec::new()
            }
        }
    }

    /// Shared access to the state after flushing any buffered embeddings.
    fn flushed_read(&self) -> parking_lot::RwLockReadGuard<'_, IndexState> {
        let guard = self.state.upgradable_read();
        if guard.buffer.is_empty() {
            return RwLockUpgradableReadGuard::downgrade(guard);
        }

        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        if let Err(e) = self.flush_locked(&mut write) {
            tracing::warn!("flush before search failed: {e}");
        }
        RwLockWriteGuard::downgrade(write)
    }

    fn stage_locked(
        &self,
        state: &mut IndexState,
        entry: PendingEmbedding,
    ) -> IndexResult<IndexOutcome> {
        if state.buffer.stage(entry) {
            self.flush_locked(state).map(IndexOutcome::Flushed)
        } else {
            Ok(IndexOutcome::Staged)
        }
    }

    fn flush_locked(&self, state: &mut IndexState) -> IndexResult<FlushReport> {
        let batch = state.buffer.drain();
        let mut report = FlushReport {
            inserted: 0,
            replaced: 0,
            upgraded: false,
            upgrade_error: None,
            saved: false,
            save_error: None,
            vector_count: state.store.vector_count(),
            structure_kind: state.store.structure_kind(),
        };

        if batch.is_empty() && !state.dirty {
            return Ok(report);
        }

        if !batch.is_empty() {
            match state.store.insert_batch(&batch) {
                Ok(outcome) => {
                    report.inserted = outcome.inserted;
                    report.replaced = outcome.replaced;
                    report.upgraded = outcome.upgraded;
                    report.upgrade_error = outcome.upgrade_error;
                    state.dirty = true;
                }
                Err(e) => {
                    tracing::error!("flush of {} embeddings failed: {e}", batch.len());
                    state.buffer.restore(batch);
                    return Err(e);
                }
            }
        }

        state.generation += 1;
        let saved = snapshot::save(
            &self.dir,
            &SnapshotSource {
                store: &state.store,
                detector: &state.detector,
                model_name: self.generator.model_name(),
                generation: state.generation,
                created_at: state.created_at,
            },
        );
        match saved {
            Ok(()) => {
                report.saved = true;
                state.dirty = false;
            }
            Err(e) => {
                tracing::warn!("snapshot save failed, will retry on next flush: {e}");
                report.save_error = Some(e.to_string());
            }
        }

        report.vector_count = state.store.vector_count();
        report.structure_kind = state.store.structure_kind();
        tracing::debug!(
            "flushed {} embeddings ({} vectors, {})",
            report.inserted,
            report.vector_count,
            report.structure_kind
        );
        Ok(report)
    }

    /// Embeds one text, checking the output length.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, String> {
        let expected = self.generator.dimension().get();
        let mut embeddings = self
            .generator
            .generate_embeddings(&[text])
            .map_err(|e| e.to_string())?;
        match embeddings.pop() {
            Some(embedding) if embeddings.is_empty() && embedding.len() == expected => {
                Ok(embedding)
            }
            Some(embedding) if embedding.len() != expected => Err(format!(
                "model returned {} values, expected {expected}",
                embedding.len()
            )),
            _ => Err("model returned no embedding".to_string()),
        }
    }

    /// Current summary.
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            index_dir: self.dir.clone(),
            model_name: self.generator.model_name().to_string(),
            dimension: state.store.dimension().get(),
            structure_kind: state.store.structure_kind(),
            trained: state.store.is_trained(),
            partitions: state.store.partition_count(),
            vector_count: state.store.vector_count(),
            buffered: state.buffer.len(),
            tracked_files: state.detector.len(),
            generation: state.generation,
            type_counts: state.store.type_counts(),
        }
    }

    /// The indexed document for `path`, excluding buffered entries.
    pub fn document(&self, path: &str) -> Option<Document> {
        self.state.read().store.document(path).cloned()
    }

    /// Type of the document under `path`, buffered or indexed.
    pub fn doc_type(&self, path: &str) -> Option<DocType> {
        let state = self.state.read();
        match state.buffer.get(path) {
            Some(pending) => Some(pending.doc_type.clone()),
            None => state.store.document(path).map(|doc| doc.doc_type.clone()),
        }
    }

    /// Paths with a recorded content digest, sorted.
    pub fn tracked_files(&self) -> Vec<String> {
        self.state.read().detector.paths().map(str::to_string).collect()
    }

    pub fn index_dir(&self) -> &Path {
        &self.dir
    }
}

fn to_hits(found: Vec<(&Document, f32)>) -> Vec<SearchHit> {
    found
        .into_iter()
        .map(|(doc, distance)| SearchHit {
            path: doc.path.clone(),
            similarity: Score::from_distance(distance).get(),
            distance,
            doc_type: doc.doc_type.clone(),
            timestamp: doc.timestamp,
        })
        .collect()
}
