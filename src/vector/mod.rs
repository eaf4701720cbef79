//! Vector storage and nearest-neighbour search.
//!
//! Two geometric structures back the index: an exhaustive [`FlatIndex`]
//! and a k-means partitioned [`IvfIndex`] (IVFFlat). Both use L2 distance.
//! The binary index artifact ([`IndexImage`]) is memory-mapped on load.

mod clustering;
mod embedding;
mod flat;
mod ivf;
mod storage;
mod types;

pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, kmeans_clustering,
    l2_distance_squared, rank_centroids,
};
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HASHING_MODEL_NAME, HashingEmbeddingGenerator,
    generator_from_config, model_dimension, parse_embedding_model,
};
pub use flat::{FlatIndex, Neighbor};
pub use ivf::IvfIndex;
pub use storage::{IndexImage, STORAGE_VERSION, StoredRow, VectorStorageError};
pub(crate) use storage::temp_path;
pub use types::{
    ClusterId, Score, StructureKind, VECTOR_DIMENSION_384, VectorDimension, VectorError, VectorId,
};
