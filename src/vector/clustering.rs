//! K-means clustering used to train the partitioned (IVF) index.
//!
//! Pure Rust implementation tuned for small training sets: the index is
//! trained once, when it is upgraded from flat to partitioned.
//!
//! # Algorithm Details
//! - Distance metric: squared Euclidean (matches the L2 search metric)
//! - Initialization: K-means++ driven by a seeded RNG, so the same training
//!   set and seed always produce the same centroids
//! - Max iterations: 100
//! - Convergence tolerance: 1e-4 mean centroid movement
//!
//! The assignment step runs on the rayon pool.

use crate::vector::types::ClusterId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Failed to initialize {requested} centroids, only {found} distinct points available\nSuggestion: Add more distinct documents before partitioning"
    )]
    InitializationFailed { requested: usize, found: usize },
}

/// Performs K-means clustering on a set of vectors using squared L2 distance.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `k` - Number of clusters (must be >= 1 and <= number of vectors)
/// * `seed` - Seed for K-means++ initialization and empty-cluster reseeding
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    seed: u64,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng)?;
    let mut assignments = vec![ClusterId::from_index(0); vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<ClusterId> = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids))
            .collect();

        let converged = iterations > 1 && new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, &mut rng);
        let movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            // Final assignment against the settled centroids
            assignments = vectors
                .par_iter()
                .map(|vector| assign_to_nearest_centroid(vector, &centroids))
                .collect();
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!("k-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Assigns a vector to the nearest centroid by squared L2 distance.
///
/// Ties go to the lower cluster id.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> ClusterId {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = l2_distance_squared(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    ClusterId::from_index(best_cluster)
}

/// Returns centroid indices ordered by ascending distance to `vector`.
pub fn rank_centroids(vector: &[f32], centroids: &[Vec<f32>]) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, l2_distance_squared(vector, c)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(i, _)| i).collect()
}

/// Squared Euclidean distance between two vectors of equal length.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Recomputes each centroid as the mean of its assigned vectors.
///
/// An empty cluster is reseeded with a random input vector.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster_id.index();
        for (acc, &value) in new_centroids[idx].iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        cluster_sizes[idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = vectors[random_idx].to_vec();
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
        }
    }

    new_centroids
}

/// Selects initial centroids with K-means++.
///
/// Each new centroid is drawn with probability proportional to its squared
/// distance from the nearest centroid chosen so far, so a point that
/// coincides with an existing centroid is never picked twice.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].to_vec());

    let mut nearest: Vec<f32> = vectors
        .iter()
        .map(|v| l2_distance_squared(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = nearest.iter().sum();
        if total < EPSILON {
            // Every remaining point coincides with a chosen centroid
            break;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &distance) in nearest.iter().enumerate() {
            cumulative += distance;
            if distance > 0.0 && cumulative >= target {
                chosen = Some(i);
                break;
            }
        }

        // Rounding can leave the target just past the last bucket
        let chosen = chosen.or_else(|| nearest.iter().rposition(|&d| d > 0.0));
        let Some(idx) = chosen else { break };

        let centroid = vectors[idx].to_vec();
        for (slot, vector) in nearest.iter_mut().zip(vectors.iter()) {
            *slot = slot.min(l2_distance_squared(vector, &centroid));
        }
        centroids.push(centroid);
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed {
            requested: k,
            found: centroids.len(),
        });
    }

    Ok(centroids)
}

/// Mean Euclidean movement of centroids between two iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| l2_distance_squared(old_c, new_c).sqrt())
        .sum::<f32>()
        / old.len() as f32
}
