//! The incremental index: documents, buffering, the store and snapshots.

pub mod buffer;
pub mod document;
pub mod engine;
pub mod snapshot;
pub mod store;

pub use buffer::{EmbeddingBuffer, PendingEmbedding};
pub use document::{DocType, Document};
pub use engine::{
    FlushReport, IndexOutcome, IndexStats, SearchFilter, SearchHit, TrackedIndex,
};
pub use snapshot::{INDEX_FILE, METADATA_FILE, SnapshotMetadata};
pub use store::{BatchOutcome, IndexStore, Structure, UpgradePolicy};
