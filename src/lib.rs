//! The main library module for trackdex

pub mod config;
pub mod error;
pub mod index;
pub mod tracking;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use index::{
    DocType, Document, FlushReport, IndexOutcome, IndexStats, SearchFilter, SearchHit,
    TrackedIndex,
};
pub use tracking::{ChangeDetector, FileWalker, FolderWatcher, SyncReport, sync_folder};
pub use vector::{
    EmbeddingGenerator, FastEmbedGenerator, HashingEmbeddingGenerator, StructureKind,
    VectorDimension, VectorId, generator_from_config,
};
