//! Keeping the index in step with a folder: content digests, traversal
//! and file watching.

pub mod change;
pub mod walker;
pub mod watcher;

pub use change::{ChangeDetector, calculate_hash, get_utc_timestamp};
pub use walker::{FileWalker, IGNORE_FILE_NAME, SyncReport, document_key, sync_folder};
pub use watcher::{ChangeBatch, FolderWatcher, WatchError, apply_changes, directory_members};
