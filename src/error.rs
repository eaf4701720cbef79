//! Error types for the tracked index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::vector::{VectorError, VectorStorageError};

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Embedding producer failed or returned malformed output
    #[error("Embedding failed for '{target}': {reason}")]
    EmbeddingFailed { target: String, reason: String },

    /// Snapshot save or load failed
    #[error("Persistence failed for '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Partitioned structure could not be trained
    #[error("Failed to partition {vectors} vectors into {partitions} partitions: {reason}")]
    UpgradeFailed {
        vectors: usize,
        partitions: usize,
        reason: String,
    },

    #[error(
        "Embedding dimension mismatch: index expects {expected}, got {actual}\nSuggestion: Use the embedding model the index was created with, or rebuild the index"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("File watcher error: {reason}")]
    Watch { reason: String },

    #[error("Failed to allocate vector ID: maximum vector count reached")]
    VectorIdExhausted,

    /// Lower-level vector errors without a dedicated variant
    #[error(transparent)]
    Vector(VectorError),
}

impl IndexError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::EmbeddingFailed { .. } => "EMBEDDING_FAILED",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::UpgradeFailed { .. } => "UPGRADE_FAILED",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Watch { .. } => "WATCH_ERROR",
            Self::VectorIdExhausted => "VECTOR_ID_EXHAUSTED",
            Self::Vector(_) => "VECTOR_ERROR",
        }
        .to_string()
    }

    /// Whether the index keeps working after this error.
    ///
    /// Only dimension mismatches and exhausted ids are hard failures.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::DimensionMismatch { .. } | Self::VectorIdExhausted | Self::ConfigError { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::EmbeddingFailed { .. } => vec![
                "The file was skipped and will be retried on its next change",
                "Check that the embedding model downloaded correctly",
            ],
            Self::Persistence { .. } => vec![
                "In-memory state is kept and the save is retried on the next flush",
                "Check disk space and permissions in the index directory",
            ],
            Self::UpgradeFailed { .. } => vec![
                "The index stays flat and retries partitioning on the next flush",
            ],
            Self::DimensionMismatch { .. } => vec![
                "Check index.dimension in .trackdex/settings.toml",
                "Delete the index directory and run 'trackdex index' to rebuild",
            ],
            Self::VectorIdExhausted => vec!["Delete the index directory and rebuild"],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
            ],
            _ => vec![],
        }
    }
}

impl From<VectorError> for IndexError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::IdsExhausted => Self::VectorIdExhausted,
            other => Self::Vector(other),
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for adding a path to storage errors
pub trait PersistenceContext<T> {
    fn with_path(self, path: &std::path::Path) -> IndexResult<T>;
}

impl<T, E> PersistenceContext<T> for Result<T, E>
where
    E: Into<PersistenceCause>,
{
    fn with_path(self, path: &std::path::Path) -> IndexResult<T> {
        self.map_err(|e| IndexError::Persistence {
            path: path.to_path_buf(),
            reason: e.into().0,
        })
    }
}

/// Message of an error that failed a snapshot operation.
pub struct PersistenceCause(String);

impl From<std::io::Error> for PersistenceCause {
    fn from(error: std::io::Error) -> Self {
        Self(error.to_string())
    }
}

impl From<serde_json::Error> for PersistenceCause {
    fn from(error: serde_json::Error) -> Self {
        Self(error.to_string())
    }
}

impl From<VectorStorageError> for PersistenceCause {
    fn from(error: VectorStorageError) -> Self {
        Self(error.to_string())
    }
}

impl From<String> for PersistenceCause {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}
