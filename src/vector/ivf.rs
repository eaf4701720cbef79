//! Partitioned (inverted-file) index.
//!
//! Vectors are grouped into k-means partitions; each partition is an
//! inverted list holding the full vectors (IVFFlat). A query probes the
//! `nprobe` partitions whose centroids are nearest and scans only those
//! lists.
//!
//! An `IvfIndex` is only obtainable by training ([`IvfIndex::train`]) or by
//! restoring trained parts from a snapshot, so an untrained partitioned
//! index cannot exist.

use std::collections::HashMap;

use crate::vector::clustering::{
    ClusteringError, assign_to_nearest_centroid, kmeans_clustering, rank_centroids,
};
use crate::vector::flat::{FlatIndex, Neighbor, select_nearest};
use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// Trained inverted-file index.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    dimension: VectorDimension,

    /// One centroid per partition
    centroids: Vec<Vec<f32>>,

    /// Inverted lists, parallel to `centroids`
    lists: Vec<FlatIndex>,

    /// Which list holds each vector
    locations: HashMap<VectorId, usize>,
}

impl IvfIndex {
    /// Trains partition centroids on `training` vectors.
    ///
    /// The returned index is empty; vectors are inserted afterwards with
    /// [`IvfIndex::add`]. If there are fewer training vectors than
    /// requested partitions, the partition count is reduced to fit.
    pub fn train(
        dimension: VectorDimension,
        training: &[&[f32]],
        partitions: usize,
        seed: u64,
    ) -> Result<Self, ClusteringError> {
        for vector in training {
            if vector.len() != dimension.get() {
                return Err(ClusteringError::DimensionMismatch);
            }
        }

        let k = partitions.clamp(1, training.len().max(1));
        let result = kmeans_clustering(training, k, seed)?;

        tracing::debug!(
            "trained {} partitions on {} vectors in {} iterations",
            result.centroids.len(),
            training.len(),
            result.iterations
        );

        Ok(Self::from_centroids(dimension, result.centroids))
    }

    /// Builds an empty index around already-trained centroids.
    pub(crate) fn from_centroids(dimension: VectorDimension, centroids: Vec<Vec<f32>>) -> Self {
        let lists = centroids.iter().map(|_| FlatIndex::new(dimension)).collect();
        Self {
            dimension,
            centroids,
            lists,
            locations: HashMap::new(),
        }
    }

    /// Inserts a vector into the list of its nearest centroid.
    pub fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(vector)?;
        let list = assign_to_nearest_centroid(vector, &self.centroids).index();
        self.insert_into_list(list, id, vector)
    }

    /// Inserts a vector into an explicit list (used when restoring).
    pub(crate) fn insert_into_list(
        &mut self,
        list: usize,
        id: VectorId,
        vector: &[f32],
    ) -> Result<(), VectorError> {
        let target = self
            .lists
            .get_mut(list)
            .ok_or_else(|| VectorError::ClusteringFailed(format!("partition {list} does not exist")))?;
        target.add(id, vector)?;
        if let Some(previous) = self.locations.insert(id, list) {
            // Same id re-added: drop the stale row
            if previous != list {
                self.lists[previous].remove(id);
            }
        }
        Ok(())
    }

    /// Removes the vector labelled `id`.
    pub fn remove(&mut self, id: VectorId) -> bool {
        match self.locations.remove(&id) {
            Some(list) => self.lists[list].remove(id),
            None => false,
        }
    }

    /// Returns the `k` nearest vectors among the closest partitions.
    ///
    /// At least `nprobe` partitions are scanned; further partitions are
    /// scanned in centroid order until `k` candidates have been collected.
    /// Results are ordered by ascending distance, ties by ascending id.
    pub fn search<F>(&self, query: &[f32], k: usize, nprobe: usize, filter: F) -> Vec<Neighbor>
    where
        F: Fn(VectorId) -> bool,
    {
        let nprobe = nprobe.max(1);
        let mut candidates = Vec::new();
        for (probed, list) in rank_centroids(query, &self.centroids).into_iter().enumerate() {
            if probed >= nprobe && candidates.len() >= k {
                break;
            }
            self.lists[list].collect_candidates(query, &filter, &mut candidates);
        }
        select_nearest(candidates, k)
    }

    /// Returns the vector stored under `id`.
    #[must_use]
    pub fn get(&self, id: VectorId) -> Option<&[f32]> {
        let list = *self.locations.get(&id)?;
        self.lists[list].get(id)
    }

    /// Iterates `(partition, id, vector)` across all lists.
    pub fn iter(&self) -> impl Iterator<Item = (usize, VectorId, &[f32])> {
        self.lists
            .iter()
            .enumerate()
            .flat_map(|(list, flat)| flat.iter().map(move |(id, v)| (list, id, v)))
    }

    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.centroids.len()
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
