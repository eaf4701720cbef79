//! The searchable index structure and its upgrade policy.
//!
//! A store starts flat. Once the number of stored vectors reaches the
//! upgrade threshold it is partitioned (IVF) exactly once; the partitioned
//! structure is trained on every stored vector before any of them is
//! re-inserted. Training failures leave the store flat and the upgrade is
//! attempted again after the next batch.

use std::collections::{BTreeMap, HashMap};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::index::buffer::PendingEmbedding;
use crate::index::document::{DocType, Document};
use crate::vector::{
    FlatIndex, IvfIndex, Neighbor, StructureKind, VectorDimension, VectorError, VectorId,
};

/// When and how the flat structure is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradePolicy {
    /// Vector count at which the upgrade happens
    pub threshold: usize,
    pub max_partitions: usize,
    pub vectors_per_partition: usize,
    pub seed: u64,
}

impl UpgradePolicy {
    #[must_use]
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            threshold: config.upgrade_threshold,
            max_partitions: config.max_partitions,
            vectors_per_partition: config.vectors_per_partition,
            seed: config.kmeans_seed,
        }
    }

    /// `min(max_partitions, count / vectors_per_partition)`, never below 1.
    #[must_use]
    pub fn partitions_for(&self, count: usize) -> usize {
        (count / self.vectors_per_partition.max(1))
            .min(self.max_partitions)
            .max(1)
    }

    #[must_use]
    pub fn should_upgrade(&self, count: usize) -> bool {
        count >= self.threshold
    }
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

/// Geometric structure backing the store.
#[derive(Debug, Clone)]
pub enum Structure {
    Flat(FlatIndex),
    /// Always trained; see [`IvfIndex::train`]
    Partitioned(IvfIndex),
}

impl Structure {
    #[must_use]
    pub fn kind(&self) -> StructureKind {
        match self {
            Self::Flat(_) => StructureKind::Flat,
            Self::Partitioned(_) => StructureKind::Partitioned,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.len(),
            Self::Partitioned(ivf) => ivf.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `ids.len()` vectors given as one row-major array.
    fn add_batch(&mut self, ids: &[VectorId], rows: &[f32]) -> Result<(), VectorError> {
        match self {
            Self::Flat(flat) => flat.add_batch(ids, rows),
            Self::Partitioned(ivf) => {
                let dim = ivf.dimension().get();
                for (id, row) in ids.iter().zip(rows.chunks_exact(dim)) {
                    ivf.add(*id, row)?;
                }
                Ok(())
            }
        }
    }

    fn remove(&mut self, id: VectorId) -> bool {
        match self {
            Self::Flat(flat) => flat.remove(id),
            Self::Partitioned(ivf) => ivf.remove(id),
        }
    }

    fn search<F>(&self, query: &[f32], k: usize, nprobe: usize, filter: F) -> Vec<Neighbor>
    where
        F: Fn(VectorId) -> bool,
    {
        match self {
            Self::Flat(flat) => flat.search(query, k, filter),
            Self::Partitioned(ivf) => ivf.search(query, k, nprobe, filter),
        }
    }
}

/// What one batch insertion did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub inserted: usize,
    /// Inserted paths that superseded an indexed document
    pub replaced: usize,
    pub upgraded: bool,
    /// Set when an upgrade was due but training failed
    pub upgrade_error: Option<String>,
}

/// Index structure plus the document mapping it serves.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dimension: VectorDimension,
    policy: UpgradePolicy,
    nprobe: usize,
    structure: Structure,
    documents: HashMap<String, Document>,
    paths_by_id: HashMap<VectorId, String>,
    next_id: VectorId,
}

impl IndexStore {
    /// Creates an empty flat store.
    pub fn new(config: &IndexConfig) -> IndexResult<Self> {
        let dimension =
            VectorDimension::new(config.dimension).map_err(|e| IndexError::ConfigError {
                reason: e.to_string(),
            })?;
        Ok(Self {
            dimension,
            policy: UpgradePolicy::from_config(config),
            nprobe: config.nprobe,
            structure: Structure::Flat(FlatIndex::new(dimension)),
            documents: HashMap::new(),
            paths_by_id: HashMap::new(),
            next_id: VectorId::new(1).ok_or(IndexError::VectorIdExhausted)?,
        })
    }

    /// Rebuilds a store from restored parts.
    ///
    /// Every stored vector must belong to exactly one document and every
    /// document must have its vector stored.
    pub(crate) fn from_parts(
        config: &IndexConfig,
        structure: Structure,
        documents: Vec<Document>,
        next_id: VectorId,
    ) -> Result<Self, String> {
        let mut store = Self::new(config).map_err(|e| e.to_string())?;
        if structure.len() != documents.len() {
            return Err(format!(
                "{} stored vectors but {} documents",
                structure.len(),
                documents.len()
            ));
        }

        for doc in documents {
            let stored = match &structure {
                Structure::Flat(flat) => flat.get(doc.vector_id),
                Structure::Partitioned(ivf) => ivf.get(doc.vector_id),
            };
            if stored.is_none() {
                return Err(format!("document '{}' has no stored vector", doc.path));
            }
            if doc.vector_id >= next_id {
                return Err(format!("vector id {} is not below the next id", doc.vector_id));
            }
            if store.paths_by_id.insert(doc.vector_id, doc.path.clone()).is_some() {
                return Err(format!("vector id {} is used twice", doc.vector_id));
            }
            if store.documents.insert(doc.path.clone(), doc).is_some() {
                return Err("duplicate document path".to_string());
            }
        }

        store.structure = structure;
        store.next_id = next_id;
        Ok(store)
    }

    /// Inserts a flushed batch, replacing earlier versions of the same paths.
    ///
    /// Upgrades a flat store once the vector count reaches the threshold.
    /// Nothing is modified when an embedding has the wrong dimension.
    pub fn insert_batch(&mut self, batch: &[PendingEmbedding]) -> IndexResult<BatchOutcome> {
        for entry in batch {
            self.dimension.validate_vector(&entry.embedding)?;
        }

        let mut ids = Vec::with_capacity(batch.len());
        let mut next = self.next_id;
        for _ in batch {
            ids.push(next);
            next = next.next().ok_or(IndexError::VectorIdExhausted)?;
        }
        self.next_id = next;

        let mut outcome = BatchOutcome::default();
        for entry in batch {
            if self.remove(&entry.path).is_some() {
                outcome.replaced += 1;
            }
        }

        let mut rows = Vec::with_capacity(batch.len() * self.dimension.get());
        for entry in batch {
            rows.extend_from_slice(&entry.embedding);
        }
        self.structure.add_batch(&ids, &rows)?;

        for (entry, &id) in batch.iter().zip(&ids) {
            self.paths_by_id.insert(id, entry.path.clone());
            self.documents.insert(
                entry.path.clone(),
                Document {
                    path: entry.path.clone(),
                    vector_id: id,
                    embedding: entry.embedding.clone(),
                    content_hash: entry.content_hash.clone(),
                    doc_type: entry.doc_type.clone(),
                    timestamp: entry.timestamp,
                },
            );
            outcome.inserted += 1;
        }

        if matches!(self.structure, Structure::Flat(_))
            && self.policy.should_upgrade(self.structure.len())
        {
            match self.upgrade() {
                Ok(()) => outcome.upgraded = true,
                Err(e) => {
                    tracing::warn!("index stays flat: {e}");
                    outcome.upgrade_error = Some(e.to_string());
                }
            }
        }

        Ok(outcome)
    }

    /// Replaces the flat structure with a trained partitioned one.
    ///
    /// A no-op once partitioned.
    pub fn upgrade(&mut self) -> IndexResult<()> {
        let Structure::Flat(flat) = &self.structure else {
            return Ok(());
        };

        let count = flat.len();
        let partitions = self.policy.partitions_for(count);
        let training: Vec<&[f32]> = flat.iter().map(|(_, vector)| vector).collect();

        let mut ivf = IvfIndex::train(self.dimension, &training, partitions, self.policy.seed)
            .map_err(|e| IndexError::UpgradeFailed {
                vectors: count,
                partitions,
                reason: e.to_string(),
            })?;
        for (id, vector) in flat.iter() {
            ivf.add(id, vector)?;
        }

        tracing::info!(
            "partitioned index: {count} vectors into {} partitions",
            ivf.partition_count()
        );
        self.structure = Structure::Partitioned(ivf);
        Ok(())
    }

    /// Removes the document stored under `path` together with its vector.
    pub fn remove(&mut self, path: &str) -> Option<Document> {
        let doc = self.documents.remove(path)?;
        self.structure.remove(doc.vector_id);
        self.paths_by_id.remove(&doc.vector_id);
        Some(doc)
    }

    /// Returns up to `k` documents nearest to `query` with their distances.
    ///
    /// With a `doc_type`, only documents of that type are ranked.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        doc_type: Option<&DocType>,
    ) -> IndexResult<Vec<(&Document, f32)>> {
        self.dimension.validate_vector(query)?;

        let k = k.min(self.structure.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let accept = |id: VectorId| match doc_type {
            None => true,
            Some(wanted) => self
                .document_by_id(id)
                .is_some_and(|doc| &doc.doc_type == wanted),
        };

        Ok(self
            .structure
            .search(query, k, self.nprobe, accept)
            .into_iter()
            .filter_map(|n| self.document_by_id(n.id).map(|doc| (doc, n.distance)))
            .collect())
    }

    fn document_by_id(&self, id: VectorId) -> Option<&Document> {
        self.paths_by_id
            .get(&id)
            .and_then(|path| self.documents.get(path))
    }

    #[must_use]
    pub fn document(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Number of documents per type.
    #[must_use]
    pub fn type_counts(&self) -> BTreeMap<DocType, usize> {
        let mut counts = BTreeMap::new();
        for doc in self.documents.values() {
            *counts.entry(doc.doc_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    #[must_use]
    pub fn structure_kind(&self) -> StructureKind {
        self.structure.kind()
    }

    /// Whether the structure accepts insertions.
    ///
    /// Flat structures need no training and partitioned ones only exist
    /// trained, so this holds for every store.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        match &self.structure {
            Structure::Flat(_) => true,
            Structure::Partitioned(ivf) => ivf.partition_count() > 0,
        }
    }

    /// Number of partitions, zero while flat.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        match &self.structure {
            Structure::Flat(_) => 0,
            Structure::Partitioned(ivf) => ivf.partition_count(),
        }
    }

    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.structure.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structure.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn policy(&self) -> &UpgradePolicy {
        &self.policy
    }

    /// Id the next inserted vector receives.
    #[must_use]
    pub fn next_id(&self) -> VectorId {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IndexConfig {
        IndexConfig {
            dimension: 2,
            ..IndexConfig::default()
        }
    }

    fn pending(path: &str, embedding: Vec<f32>, doc_type: &str) -> PendingEmbedding {
        PendingEmbedding {
            path: path.to_string(),
            embedding,
            doc_type: DocType::from(doc_type),
            content_hash: None,
            timestamp: 0,
        }
    }

    /// Distinct points spread over a 2-D grid.
    fn grid(n: usize) -> Vec<PendingEmbedding> {
        (0..n)
            .map(|i| {
                pending(
                    &format!("f{i}.py"),
                    vec![(i % 7) as f32 * 3.0, (i / 7) as f32 * 3.0],
                    "code",
                )
            })
            .collect()
    }

    #[test]
    fn test_partitions_for() {
        let policy = UpgradePolicy::default();
        assert_eq!(policy.partitions_for(0), 1);
        assert_eq!(policy.partitions_for(9), 1);
        assert_eq!(policy.partitions_for(25), 2);
        assert_eq!(policy.partitions_for(40), 4);
        assert_eq!(policy.partitions_for(1000), 4);
    }

    #[test]
    fn test_upgrade_at_threshold() {
        let mut store = IndexStore::new(&config()).unwrap();
        let mut batch = grid(40);
        let last = batch.pop().unwrap();

        store.insert_batch(&batch).unwrap();
        assert_eq!(store.vector_count(), 39);
        assert_eq!(store.structure_kind(), StructureKind::Flat);

        let outcome = store.insert_batch(&[last]).unwrap();
        assert!(outcome.upgraded);
        assert_eq!(store.structure_kind(), StructureKind::Partitioned);
        assert!(store.is_trained());
        assert_eq!(store.partition_count(), 4);
        assert_eq!(store.vector_count(), 40);

        // One-way: further growth keeps the same partitioning
        store.insert_batch(&[pending("extra.py", vec![50.0, 50.0], "code")]).unwrap();
        assert_eq!(store.structure_kind(), StructureKind::Partitioned);
        assert_eq!(store.partition_count(), 4);
    }

    #[test]
    fn test_batch_rows_land_under_their_ids() {
        let mut store = IndexStore::new(&config()).unwrap();
        store.insert_batch(&grid(40)).unwrap();
        assert_eq!(store.structure_kind(), StructureKind::Partitioned);

        let batch = vec![
            pending("p.py", vec![100.0, 0.0], "code"),
            pending("q.py", vec![0.0, 100.0], "code"),
        ];
        store.insert_batch(&batch).unwrap();

        for entry in &batch {
            let hits = store.search(&entry.embedding, 1, None).unwrap();
            assert_eq!(hits[0].0.path, entry.path);
            assert_eq!(hits[0].1, 0.0);
        }

        let mut flat = IndexStore::new(&config()).unwrap();
        flat.insert_batch(&batch).unwrap();
        let hits = flat.search(&[0.0, 100.0], 2, None).unwrap();
        assert_eq!(hits[0].0.path, "q.py");
        assert_eq!(hits[1].0.path, "p.py");
    }

    #[test]
    fn test_degenerate_upgrade_stays_flat() {
        let mut store = IndexStore::new(&config()).unwrap();
        let batch: Vec<_> = (0..40)
            .map(|i| pending(&format!("same{i}.py"), vec![1.0, 1.0], "code"))
            .collect();

        let outcome = store.insert_batch(&batch).unwrap();
        assert!(!outcome.upgraded);
        assert!(outcome.upgrade_error.is_some());
        assert_eq!(store.structure_kind(), StructureKind::Flat);
        assert_eq!(store.vector_count(), 40);
    }

    #[test]
    fn test_replacing_a_path_keeps_one_document() {
        let mut store = IndexStore::new(&config()).unwrap();
        store.insert_batch(&[pending("a.py", vec![0.0, 0.0], "code")]).unwrap();
        let first_id = store.document("a.py").unwrap().vector_id;

        let outcome = store
            .insert_batch(&[pending("a.py", vec![5.0, 5.0], "code")])
            .unwrap();
        assert_eq!(outcome.replaced, 1);
        assert_eq!(store.vector_count(), 1);

        let doc = store.document("a.py").unwrap();
        assert!(doc.vector_id > first_id);
        assert_eq!(doc.embedding, vec![5.0, 5.0]);
    }

    #[test]
    fn test_dimension_mismatch_leaves_store_untouched() {
        let mut store = IndexStore::new(&config()).unwrap();
        let result = store.insert_batch(&[
            pending("ok.py", vec![1.0, 2.0], "code"),
            pending("bad.py", vec![1.0, 2.0, 3.0], "code"),
        ]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(store.is_empty());
        assert_eq!(store.next_id().get(), 1);
    }

    #[test]
    fn test_search_filters_before_ranking() {
        let mut store = IndexStore::new(&config()).unwrap();
        store
            .insert_batch(&[
                pending("near1.py", vec![0.0, 0.0], "code"),
                pending("near2.py", vec![0.1, 0.0], "code"),
                pending("chat", vec![9.0, 9.0], "conversation"),
            ])
            .unwrap();

        let hits = store
            .search(&[0.0, 0.0], 1, Some(&DocType::conversation()))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.path, "chat");

        let all = store.search(&[0.0, 0.0], 10, None).unwrap();
        let paths: Vec<&str> = all.iter().map(|(d, _)| d.path.as_str()).collect();
        assert_eq!(paths, vec!["near1.py", "near2.py", "chat"]);
        assert_eq!(all[0].1, 0.0);
    }

    #[test]
    fn test_remove() {
        let mut store = IndexStore::new(&config()).unwrap();
        store.insert_batch(&grid(3)).unwrap();

        let removed = store.remove("f1.py").unwrap();
        assert_eq!(removed.path, "f1.py");
        assert!(store.remove("f1.py").is_none());
        assert_eq!(store.vector_count(), 2);

        let hits = store.search(&[3.0, 0.0], 3, None).unwrap();
        assert!(hits.iter().all(|(d, _)| d.path != "f1.py"));
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_state() {
        let mut store = IndexStore::new(&config()).unwrap();
        store.insert_batch(&grid(2)).unwrap();
        let documents: Vec<Document> = store.documents().cloned().collect();

        let rebuilt = IndexStore::from_parts(
            &config(),
            store.structure().clone(),
            documents.clone(),
            store.next_id(),
        )
        .unwrap();
        assert_eq!(rebuilt.vector_count(), 2);

        let missing_doc =
            IndexStore::from_parts(&config(), store.structure().clone(), documents[..1].to_vec(), store.next_id());
        assert!(missing_doc.is_err());

        let stale_next_id = IndexStore::from_parts(
            &config(),
            store.structure().clone(),
            documents,
            VectorId::new(1).unwrap(),
        );
        assert!(stale_next_id.is_err());
    }
}
