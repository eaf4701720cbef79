//! File system watcher for automatic re-indexing of changed files
//!
//! Watches the tracked root recursively. Events for files the walker would
//! accept are debounced; once a file has been quiet for the debounce
//! interval it is re-read and gated through the change detector, or
//! removed from the index if it no longer exists.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use crate::error::IndexError;
use crate::index::{DocType, IndexOutcome, TrackedIndex};
use crate::tracking::walker::{FileWalker, document_key};

/// Errors specific to file watching operations
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(
        "Failed to initialize file watcher: {reason}\nSuggestion: Check file system permissions and inotify limits"
    )]
    WatcherInitFailed { reason: String },

    #[error(
        "Cannot watch path {path:?}: {reason}\nSuggestion: Verify the path exists and you have read permissions"
    )]
    PathWatchFailed { path: PathBuf, reason: String },
}

impl From<WatchError> for IndexError {
    fn from(error: WatchError) -> Self {
        IndexError::Watch {
            reason: error.to_string(),
        }
    }
}

/// Totals of one debounced batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Watches a tracked folder and keeps the index in sync with it.
pub struct FolderWatcher {
    index: Arc<TrackedIndex>,
    walker: FileWalker,
    root: PathBuf,
    /// How long a file must be quiet before it is processed
    debounce: Duration,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    /// The actual file watcher (kept alive by storing it)
    watcher: notify::RecommendedWatcher,
}

impl FolderWatcher {
    pub fn new(
        index: Arc<TrackedIndex>,
        walker: FileWalker,
        root: &Path,
        debounce_ms: u64,
    ) -> Result<Self, WatchError> {
        let root = root
            .canonicalize()
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);

        // The notify callback is sync, hence blocking_send
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| WatchError::WatcherInitFailed {
            reason: e.to_string(),
        })?;

        Ok(Self {
            index,
            walker,
            root,
            debounce: Duration::from_millis(debounce_ms),
            event_rx: rx,
            watcher,
        })
    }

    /// Runs until `shutdown` resolves, then flushes the index.
    pub async fn watch(mut self, shutdown: impl Future<Output = ()>) -> Result<(), WatchError> {
        self.watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            "watching {} (debounce {}ms)",
            self.root.display(),
            self.debounce.as_millis()
        );

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        tokio::pin!(shutdown);

        loop {
            let tick = sleep(Duration::from_millis(100));
            tokio::pin!(tick);

            tokio::select! {
                _ = &mut shutdown => break,

                Some(res) = self.event_rx.recv() => match res {
                    Ok(event) => self.record(event, &mut pending),
                    Err(e) => tracing::warn!("file watch error: {e}"),
                },

                _ = &mut tick => {
                    let now = Instant::now();
                    let mut ready = Vec::new();
                    pending.retain(|path, last_change| {
                        if now.duration_since(*last_change) >= self.debounce {
                            ready.push(path.clone());
                            false
                        } else {
                            true
                        }
                    });

                    if !ready.is_empty() {
                        self.process(ready).await;
                    }
                }
            }
        }

        tracing::info!("file watcher stopping");
        let index = Arc::clone(&self.index);
        match tokio::task::spawn_blocking(move || index.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("final flush failed: {e}"),
            Err(e) => tracing::error!("final flush task failed: {e}"),
        }
        Ok(())
    }

    fn record(&self, event: Event, pending: &mut HashMap<PathBuf, Instant>) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for path in event.paths {
            if self.walker.accepts(&self.root, &path) {
                pending.insert(path, Instant::now());
                continue;
            }
            // Directory moves arrive as one event on the directory itself
            let members =
                directory_members(&self.walker, &self.root, &path, || self.index.tracked_files());
            let now = Instant::now();
            for member in members {
                pending.insert(member, now);
            }
        }
    }

    async fn process(&self, paths: Vec<PathBuf>) {
        let index = Arc::clone(&self.index);
        let root = self.root.clone();
        let result =
            tokio::task::spawn_blocking(move || apply_changes(&index, &root, &paths)).await;
        match result {
            Ok(batch) => tracing::info!(
                "processed changes: {} indexed, {} unchanged, {} removed, {} failed",
                batch.indexed,
                batch.unchanged,
                batch.removed,
                batch.failed
            ),
            Err(e) => tracing::error!("change processing task failed: {e}"),
        }
    }
}

/// Files affected by an event on directory `dir` under `root`.
///
/// An existing directory yields every file the walker accepts below it. A
/// vanished one yields the tracked keys that lived below it, so they are
/// removed. Hidden directories and plain files yield nothing.
pub fn directory_members(
    walker: &FileWalker,
    root: &Path,
    dir: &Path,
    tracked: impl FnOnce() -> Vec<String>,
) -> Vec<PathBuf> {
    let Ok(relative) = dir.strip_prefix(root) else {
        return Vec::new();
    };
    if relative.as_os_str().is_empty()
        || relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.'))
        })
    {
        return Vec::new();
    }

    if dir.is_dir() {
        return walker
            .walk(dir)
            .filter(|file| walker.accepts(root, file))
            .collect();
    }
    if dir.exists() {
        return Vec::new();
    }

    let prefix = format!("{}/", document_key(root, dir));
    tracked()
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        .map(|key| root.join(key))
        .collect()
}

/// Re-indexes existing paths and removes vanished ones, then flushes.
pub fn apply_changes(index: &TrackedIndex, root: &Path, paths: &[PathBuf]) -> ChangeBatch {
    let mut batch = ChangeBatch::default();

    for path in paths {
        let key = document_key(root, path);
        if !path.exists() {
            if index.remove(&key) {
                tracing::debug!("{key} deleted, removed from index");
                batch.removed += 1;
            }
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match index.ingest(&key, &content, DocType::code()) {
                Ok(IndexOutcome::Unchanged) => batch.unchanged += 1,
                Ok(_) => batch.indexed += 1,
                Err(e) => {
                    tracing::warn!("failed to re-index {key}: {e}");
                    batch.failed += 1;
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {e}", path.display());
                batch.failed += 1;
            }
        }
    }

    if batch.indexed > 0 || batch.removed > 0 {
        if let Err(e) = index.flush() {
            tracing::warn!("flush after changes failed: {e}");
        }
    }
    batch
}
