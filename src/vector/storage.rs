//! Binary index artifact with memory-mapped loading.
//!
//! The artifact stores everything needed to rebuild the search structure
//! without retraining: centroids of the partitioned index and every row
//! with its label and partition.
//!
//! # Storage Format
//!
//! All integers and floats are little-endian.
//! - Header (32 bytes): magic `TDIX`, format version, dimension, structure
//!   kind tag, partition count, vector count (u32 each), generation (u64)
//! - Centroids: `partitions × dimension` f32 values
//! - Rows: `vector_count × (id: u32, partition: u32, dimension × f32)`
//!
//! Writes go to a temporary sibling file that is renamed over the target,
//! so a crash mid-write leaves the previous artifact intact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::vector::types::{StructureKind, VectorDimension, VectorError, VectorId};

/// Current storage format version.
pub const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes to identify index artifacts.
const MAGIC_BYTES: &[u8; 4] = b"TDIX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Bytes preceding the vector data of each row (id + partition).
const ROW_PREFIX: usize = 8;

/// Errors specific to index artifact operations.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// One stored vector as it appears in the artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: VectorId,
    /// Partition index (always 0 for a flat structure)
    pub partition: u32,
    pub vector: Vec<f32>,
}

/// Format-level image of the search structure.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexImage {
    pub dimension: VectorDimension,
    pub kind: StructureKind,
    /// Shared with the metadata artifact to detect mismatched pairs
    pub generation: u64,
    pub centroids: Vec<Vec<f32>>,
    pub rows: Vec<StoredRow>,
}

impl IndexImage {
    /// Writes the image to `path` atomically.
    pub fn write(&self, path: &Path) -> Result<(), VectorStorageError> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temp_path(path);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            self.write_header(&mut writer)?;

            for centroid in &self.centroids {
                write_floats(&mut writer, centroid)?;
            }

            for row in &self.rows {
                writer.write_all(&row.id.to_bytes())?;
                writer.write_all(&row.partition.to_le_bytes())?;
                write_floats(&mut writer, &row.vector)?;
            }

            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Memory-maps and parses the artifact at `path`.
    pub fn read(path: &Path) -> Result<Self, VectorStorageError> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::parse(&mmap)
    }

    fn parse(mmap: &Mmap) -> Result<Self, VectorStorageError> {
        if mmap.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorStorageError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = read_u32(mmap, 4);
        if version != STORAGE_VERSION {
            return Err(VectorStorageError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(read_u32(mmap, 8) as usize)?;
        let kind_tag = read_u32(mmap, 12);
        let kind = StructureKind::from_tag(kind_tag).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!("Unknown structure kind tag {kind_tag}"))
        })?;
        let partitions = read_u32(mmap, 16) as usize;
        let vector_count = read_u32(mmap, 20) as usize;
        let generation = read_u64(mmap, 24);

        let dim = dimension.get();
        let row_size = ROW_PREFIX + dim * BYTES_PER_F32;
        let expected_len = HEADER_SIZE + partitions * dim * BYTES_PER_F32 + vector_count * row_size;
        if mmap.len() != expected_len {
            return Err(VectorStorageError::InvalidFormat(format!(
                "Expected {expected_len} bytes but found {} (truncated or trailing data)",
                mmap.len()
            )));
        }

        let mut offset = HEADER_SIZE;
        let mut centroids = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            centroids.push(read_floats(mmap, offset, dim));
            offset += dim * BYTES_PER_F32;
        }

        let mut rows = Vec::with_capacity(vector_count);
        for _ in 0..vector_count {
            let id = VectorId::new(read_u32(mmap, offset)).ok_or_else(|| {
                VectorStorageError::InvalidFormat("Invalid vector ID".to_string())
            })?;
            let partition = read_u32(mmap, offset + 4);
            let vector = read_floats(mmap, offset + ROW_PREFIX, dim);
            rows.push(StoredRow {
                id,
                partition,
                vector,
            });
            offset += row_size;
        }

        let image = Self {
            dimension,
            kind,
            generation,
            centroids,
            rows,
        };
        image.validate()?;
        Ok(image)
    }

    /// Checks internal consistency shared by reading and writing.
    fn validate(&self) -> Result<(), VectorStorageError> {
        for centroid in &self.centroids {
            self.dimension.validate_vector(centroid)?;
        }
        for row in &self.rows {
            self.dimension.validate_vector(&row.vector)?;
        }

        match self.kind {
            StructureKind::Flat => {
                if !self.centroids.is_empty() {
                    return Err(VectorStorageError::InvalidFormat(
                        "Flat structure cannot carry centroids".to_string(),
                    ));
                }
                if self.rows.iter().any(|row| row.partition != 0) {
                    return Err(VectorStorageError::InvalidFormat(
                        "Flat structure rows must use partition 0".to_string(),
                    ));
                }
            }
            StructureKind::Partitioned => {
                if self.centroids.is_empty() {
                    return Err(VectorStorageError::InvalidFormat(
                        "Partitioned structure has no trained centroids".to_string(),
                    ));
                }
                let limit = self.centroids.len() as u32;
                if let Some(row) = self.rows.iter().find(|row| row.partition >= limit) {
                    return Err(VectorStorageError::InvalidFormat(format!(
                        "Row {} points at missing partition {}",
                        row.id, row.partition
                    )));
                }
            }
        }

        Ok(())
    }

    fn write_header(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&STORAGE_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimension.get() as u32).to_le_bytes())?;
        writer.write_all(&self.kind.tag().to_le_bytes())?;
        writer.write_all(&(self.centroids.len() as u32).to_le_bytes())?;
        writer.write_all(&(self.rows.len() as u32).to_le_bytes())?;
        writer.write_all(&self.generation.to_le_bytes())?;
        Ok(())
    }
}

/// Path of the temporary file used while writing `path`.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_floats(writer: &mut impl Write, values: &[f32]) -> io::Result<()> {
    for &value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn read_floats(bytes: &[u8], offset: usize, count: usize) -> Vec<f32> {
    bytes[offset..offset + count * BYTES_PER_F32]
        .chunks_exact(BYTES_PER_F32)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
