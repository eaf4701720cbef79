//! Tracked folder traversal and synchronization.
//!
//! Discovery respects:
//! - .gitignore rules (without requiring a git repository)
//! - `.trackdexignore` files
//! - ignore patterns and the extension list from configuration
//!
//! Hidden files and directories are skipped, which also keeps the index
//! directory out of the tracked set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};

use crate::config::TrackingConfig;
use crate::error::{IndexError, IndexResult};
use crate::index::{DocType, FlushReport, IndexOutcome, TrackedIndex};

/// Name of per-directory ignore files.
pub const IGNORE_FILE_NAME: &str = ".trackdexignore";

/// Walks directories to find files to index
#[derive(Debug, Clone)]
pub struct FileWalker {
    config: TrackingConfig,
}

impl FileWalker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Walk a directory and return an iterator of files to index
    pub fn walk(&self, root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
        let mut builder = WalkBuilder::new(root);

        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .max_depth(None)
            .require_git(false);
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);

        if let Some(overrides) = self.exclusions(root) {
            builder.overrides(overrides);
        }

        let extensions = self.config.extensions.clone();

        builder
            .build()
            .filter_map(Result::ok) // Skip files we can't access
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(move |entry| {
                let ext = entry.path().extension()?.to_str()?;
                if extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)) {
                    Some(entry.into_path())
                } else {
                    None
                }
            })
    }

    /// Returns true when `path` (under `root`) would be picked up by `walk`.
    ///
    /// Checks the extension and the configured patterns only; gitignore
    /// files are not consulted.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        let extension_ok = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            });
        if !extension_ok {
            return false;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.'))
        }) {
            return false;
        }

        let Some(overrides) = self.exclusions(root) else {
            return true;
        };

        // Directory patterns exclude everything below them
        let mut current = root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            let is_dir = current.as_path() != path;
            if overrides.matched(&current, is_dir).is_ignore() {
                return false;
            }
        }
        true
    }

    /// Configured ignore patterns as negated overrides.
    fn exclusions(&self, root: &Path) -> Option<Override> {
        if self.config.ignore_patterns.is_empty() {
            return None;
        }

        let mut overrides = OverrideBuilder::new(root);
        for pattern in &self.config.ignore_patterns {
            if let Err(e) = overrides.add(&format!("!{pattern}")) {
                tracing::warn!("ignoring invalid pattern '{pattern}': {e}");
            }
        }
        match overrides.build() {
            Ok(built) => Some(built),
            Err(e) => {
                tracing::warn!("ignore patterns unusable: {e}");
                None
            }
        }
    }

    /// Count files that would be indexed (useful for dry runs)
    pub fn count_files(&self, root: &Path) -> usize {
        self.walk(root).count()
    }
}

/// Index key of `path`: relative to `root`, with `/` separators.
///
/// Paths outside `root` keep their full form.
pub fn document_key(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}

/// Totals of one folder synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub removed: usize,
    /// Final flush; `None` if the flush itself failed
    pub flush: Option<FlushReport>,
}

/// Brings the index in line with the files under `root`.
///
/// Every supported file is gated through the change detector and embedded
/// only if its content changed. Tracked files that no longer exist under
/// `root` are removed. Per-file failures are logged and counted; only
/// unrecoverable errors abort the sync. `on_progress` receives
/// `(done, total)` after each file.
pub fn sync_folder(
    index: &TrackedIndex,
    walker: &FileWalker,
    root: &Path,
    mut on_progress: impl FnMut(usize, usize),
) -> IndexResult<SyncReport> {
    let files: Vec<PathBuf> = walker.walk(root).collect();
    let total = files.len();
    let mut report = SyncReport::default();
    let mut seen = HashSet::with_capacity(total);

    tracing::info!("syncing {total} files under {}", root.display());

    for (done, path) in files.iter().enumerate() {
        let key = document_key(root, path);
        report.scanned += 1;

        match fs::read_to_string(path) {
            Ok(content) => match index.ingest(&key, &content, DocType::code()) {
                Ok(IndexOutcome::Unchanged) => report.unchanged += 1,
                Ok(_) => report.indexed += 1,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("failed to index {key}: {e}");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            },
            Err(source) => {
                let err = IndexError::FileRead {
                    path: path.clone(),
                    source,
                };
                tracing::warn!("{err}");
                report.failed += 1;
            }
        }

        seen.insert(key);
        on_progress(done + 1, total);
    }

    for key in index.tracked_files() {
        if seen.contains(&key) || !is_stale_file(index, root, &key) {
            continue;
        }
        if index.remove(&key) {
            tracing::debug!("{key} no longer exists, removed");
            report.removed += 1;
        }
    }

    report.flush = match index.flush() {
        Ok(flush) => Some(flush),
        Err(e) if e.is_recoverable() => {
            tracing::warn!("final flush failed: {e}");
            None
        }
        Err(e) => return Err(e),
    };

    Ok(report)
}

/// True when `key` names a code file that is gone from under `root`.
///
/// Conversation snippets and other non-file documents have no backing file
/// and are left alone.
fn is_stale_file(index: &TrackedIndex, root: &Path, key: &str) -> bool {
    let is_code = index
        .doc_type(key)
        .is_none_or(|doc_type| doc_type.as_str() == DocType::CODE);
    is_code && !root.join(key).exists()
}
