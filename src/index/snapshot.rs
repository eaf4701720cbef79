//! Snapshot save and restore.
//!
//! A snapshot is two artifacts in the index directory:
//! - `index.vec`: the binary index structure (see [`IndexImage`])
//! - `metadata.json`: documents, structure flags and the digest table
//!
//! Both carry the same generation number. The index artifact is written
//! first and the metadata second, each through a temporary file and a
//! rename, so a crash between the two leaves mismatched generations and
//! the pair is rejected as a whole on the next load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult, PersistenceContext};
use crate::index::document::Document;
use crate::index::store::{IndexStore, Structure};
use crate::tracking::{ChangeDetector, get_utc_timestamp};
use crate::vector::{
    FlatIndex, IndexImage, IvfIndex, StoredRow, StructureKind, VectorDimension, VectorId,
    temp_path,
};

pub const INDEX_FILE: &str = "index.vec";
pub const METADATA_FILE: &str = "metadata.json";

/// Version of the metadata schema
pub const METADATA_VERSION: u32 = 1;

/// Contents of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,

    /// Must equal the generation in the index artifact
    pub generation: u64,

    pub dimension: usize,

    /// Name of the embedding model the vectors came from
    pub model_name: String,

    pub structure_kind: StructureKind,

    pub trained: bool,

    pub vector_count: usize,

    pub next_vector_id: VectorId,

    /// Unix timestamp when the index was created
    pub created_at: u64,

    /// Unix timestamp of this save
    pub updated_at: u64,

    /// Live documents, sorted by path
    pub documents: Vec<Document>,

    /// Change detector digests by path
    pub hashes: BTreeMap<String, String>,
}

/// State restored from disk.
#[derive(Debug)]
pub struct Snapshot {
    pub store: IndexStore,
    pub detector: ChangeDetector,
    pub generation: u64,
    pub created_at: u64,
}

/// Borrowed state to persist.
pub struct SnapshotSource<'a> {
    pub store: &'a IndexStore,
    pub detector: &'a ChangeDetector,
    pub model_name: &'a str,
    pub generation: u64,
    pub created_at: u64,
}

#[must_use]
pub fn index_file(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

#[must_use]
pub fn metadata_file(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

/// Writes both artifacts into `dir`.
pub fn save(dir: &Path, source: &SnapshotSource<'_>) -> IndexResult<()> {
    fs::create_dir_all(dir).with_path(dir)?;

    let store = source.store;
    let index_path = index_file(dir);
    to_image(store, source.generation)
        .write(&index_path)
        .with_path(&index_path)?;

    let mut documents: Vec<Document> = store.documents().cloned().collect();
    documents.sort_by(|a, b| a.path.cmp(&b.path));

    let metadata = SnapshotMetadata {
        version: METADATA_VERSION,
        generation: source.generation,
        dimension: store.dimension().get(),
        model_name: source.model_name.to_string(),
        structure_kind: store.structure_kind(),
        trained: store.is_trained(),
        vector_count: store.vector_count(),
        next_vector_id: store.next_id(),
        created_at: source.created_at,
        updated_at: get_utc_timestamp(),
        documents,
        hashes: source.detector.hashes().clone(),
    };

    let metadata_path = metadata_file(dir);
    let json = serde_json::to_vec_pretty(&metadata).with_path(&metadata_path)?;
    let tmp = temp_path(&metadata_path);
    fs::write(&tmp, json).with_path(&tmp)?;
    fs::rename(&tmp, &metadata_path).with_path(&metadata_path)?;

    tracing::debug!(
        "saved snapshot generation {} ({} vectors) to {}",
        source.generation,
        metadata.vector_count,
        dir.display()
    );
    Ok(())
}

/// Reads both artifacts from `dir`.
///
/// Returns `Ok(None)` when neither artifact exists. A partial, corrupt or
/// incompatible pair is an error.
pub fn load(dir: &Path, config: &IndexConfig, model_name: &str) -> IndexResult<Option<Snapshot>> {
    let index_path = index_file(dir);
    let metadata_path = metadata_file(dir);

    match (index_path.exists(), metadata_path.exists()) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(mismatch(&metadata_path, "metadata artifact is missing".to_string()));
        }
        (false, true) => {
            return Err(mismatch(&index_path, "index artifact is missing".to_string()));
        }
        (true, true) => {}
    }

    let json = fs::read(&metadata_path).with_path(&metadata_path)?;
    let metadata: SnapshotMetadata = serde_json::from_slice(&json).with_path(&metadata_path)?;

    if metadata.version != METADATA_VERSION {
        return Err(mismatch(
            &metadata_path,
            format!("unsupported metadata version {}", metadata.version),
        ));
    }
    if metadata.dimension != config.dimension {
        return Err(mismatch(
            &metadata_path,
            format!(
                "snapshot dimension {} does not match configured dimension {}",
                metadata.dimension, config.dimension
            ),
        ));
    }
    if metadata.model_name != model_name {
        return Err(mismatch(
            &metadata_path,
            format!(
                "snapshot was built with model '{}', current model is '{model_name}'",
                metadata.model_name
            ),
        ));
    }

    let image = IndexImage::read(&index_path).with_path(&index_path)?;
    if image.generation != metadata.generation {
        return Err(mismatch(
            &index_path,
            format!(
                "index generation {} does not match metadata generation {}",
                image.generation, metadata.generation
            ),
        ));
    }
    if image.dimension.get() != metadata.dimension || image.kind != metadata.structure_kind {
        return Err(mismatch(
            &index_path,
            "index artifact disagrees with metadata".to_string(),
        ));
    }

    let structure = from_image(image).map_err(|reason| mismatch(&index_path, reason))?;
    let store = IndexStore::from_parts(config, structure, metadata.documents, metadata.next_vector_id)
        .map_err(|reason| mismatch(&metadata_path, reason))?;

    Ok(Some(Snapshot {
        store,
        detector: ChangeDetector::from_hashes(metadata.hashes),
        generation: metadata.generation,
        created_at: metadata.created_at,
    }))
}

fn mismatch(path: &Path, reason: String) -> IndexError {
    IndexError::Persistence {
        path: path.to_path_buf(),
        reason,
    }
}

fn to_image(store: &IndexStore, generation: u64) -> IndexImage {
    let (centroids, rows) = match store.structure() {
        Structure::Flat(flat) => (
            Vec::new(),
            flat.iter()
                .map(|(id, vector)| StoredRow {
                    id,
                    partition: 0,
                    vector: vector.to_vec(),
                })
                .collect(),
        ),
        Structure::Partitioned(ivf) => (
            ivf.centroids().to_vec(),
            ivf.iter()
                .map(|(partition, id, vector)| StoredRow {
                    id,
                    partition: partition as u32,
                    vector: vector.to_vec(),
                })
                .collect(),
        ),
    };

    IndexImage {
        dimension: store.dimension(),
        kind: store.structure_kind(),
        generation,
        centroids,
        rows,
    }
}

fn from_image(image: IndexImage) -> Result<Structure, String> {
    let dimension: VectorDimension = image.dimension;
    match image.kind {
        StructureKind::Flat => {
            let mut flat = FlatIndex::new(dimension);
            for row in image.rows {
                flat.add(row.id, &row.vector).map_err(|e| e.to_string())?;
            }
            Ok(Structure::Flat(flat))
        }
        StructureKind::Partitioned => {
            let mut ivf = IvfIndex::from_centroids(dimension, image.centroids);
            for row in image.rows {
                ivf.insert_into_list(row.partition as usize, row.id, &row.vector)
                    .map_err(|e| e.to_string())?;
            }
            Ok(Structure::Partitioned(ivf))
        }
    }
}
