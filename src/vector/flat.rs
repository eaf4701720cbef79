//! Exhaustive (flat) L2 index.
//!
//! Vectors live in one contiguous `f32` array, row-major, with a parallel
//! array of row labels. A query is compared against every row. The same
//! type doubles as the inverted list of the partitioned index.

use crate::vector::clustering::l2_distance_squared;
use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// A stored vector returned by a nearest-neighbour query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: VectorId,
    /// Euclidean (not squared) distance to the query.
    pub distance: f32,
}

/// Exhaustive-scan index over a contiguous vector array.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: VectorDimension,
    ids: Vec<VectorId>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Creates an empty index for vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Appends one vector under `id`.
    pub fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(vector)?;
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Appends a batch given as a row-major array with one row per id.
    pub fn add_batch(&mut self, ids: &[VectorId], rows: &[f32]) -> Result<(), VectorError> {
        let dim = self.dimension.get();
        if rows.len() != ids.len() * dim {
            return Err(VectorError::DimensionMismatch {
                expected: ids.len() * dim,
                actual: rows.len(),
            });
        }
        self.ids.extend_from_slice(ids);
        self.data.extend_from_slice(rows);
        Ok(())
    }

    /// Removes the vector labelled `id`, keeping the order of the rest.
    ///
    /// Returns `false` if no such vector is stored.
    pub fn remove(&mut self, id: VectorId) -> bool {
        let Some(pos) = self.ids.iter().position(|stored| *stored == id) else {
            return false;
        };
        let dim = self.dimension.get();
        self.ids.remove(pos);
        self.data.drain(pos * dim..(pos + 1) * dim);
        true
    }

    /// Returns the vector stored under `id`.
    #[must_use]
    pub fn get(&self, id: VectorId) -> Option<&[f32]> {
        let pos = self.ids.iter().position(|stored| *stored == id)?;
        Some(self.row(pos))
    }

    /// Scans every row and returns the `k` nearest accepted by `filter`.
    ///
    /// Results are ordered by ascending distance, ties by ascending id.
    pub fn search<F>(&self, query: &[f32], k: usize, filter: F) -> Vec<Neighbor>
    where
        F: Fn(VectorId) -> bool,
    {
        let mut candidates = Vec::new();
        self.collect_candidates(query, &filter, &mut candidates);
        select_nearest(candidates, k)
    }

    /// Pushes the squared distance of every accepted row into `out`.
    pub(crate) fn collect_candidates<F>(&self, query: &[f32], filter: &F, out: &mut Vec<Neighbor>)
    where
        F: Fn(VectorId) -> bool,
    {
        for (pos, id) in self.ids.iter().enumerate() {
            if filter(*id) {
                out.push(Neighbor {
                    id: *id,
                    distance: l2_distance_squared(query, self.row(pos)),
                });
            }
        }
    }

    /// Iterates `(id, vector)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (VectorId, &[f32])> {
        self.ids
            .iter()
            .copied()
            .zip(self.data.chunks_exact(self.dimension.get()))
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn row(&self, pos: usize) -> &[f32] {
        let dim = self.dimension.get();
        &self.data[pos * dim..(pos + 1) * dim]
    }
}

/// Sorts squared-distance candidates and keeps the `k` nearest.
///
/// Converts the surviving squared distances to Euclidean distances.
pub(crate) fn select_nearest(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    candidates.truncate(k);
    for neighbor in &mut candidates {
        neighbor.distance = neighbor.distance.sqrt();
    }
    candidates
}
