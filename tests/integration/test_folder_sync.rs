//! Syncing a folder into the index.

use std::fs;

use tempfile::TempDir;
use trackdex::config::TrackingConfig;
use trackdex::{DocType, FileWalker, sync_folder};

use crate::common::{TestProject, open_index, test_settings};

#[test]
fn test_sync_indexes_changed_files_only() {
    let project = TestProject::new();
    let state = TempDir::new().unwrap();
    let index = open_index(&test_settings(state.path()));
    let walker = FileWalker::new(TrackingConfig::default());

    project.add_file("src/app.py", "def app(): return 1");
    project.add_file("README.md", "# Project notes");
    project.add_file("logo.png", "binary-ish");

    let mut progress = Vec::new();
    let report = sync_folder(&index, &walker, project.path(), |done, total| {
        progress.push((done, total));
    })
    .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.indexed, 2);
    assert_eq!(progress.last(), Some(&(2, 2)));
    assert!(report.flush.as_ref().is_some_and(|flush| flush.saved));

    let report = sync_folder(&index, &walker, project.path(), |_, _| {}).unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.unchanged, 2);

    let hits = index.search("def app(): return 1", 1);
    assert_eq!(hits[0].path, "src/app.py");
}

#[test]
fn test_sync_removes_vanished_files() {
    let project = TestProject::new();
    let state = TempDir::new().unwrap();
    let index = open_index(&test_settings(state.path()));
    let walker = FileWalker::new(TrackingConfig::default());

    let app = project.add_file("app.py", "def app(): return 1");
    let notes = project.add_file("notes.md", "meeting notes");
    sync_folder(&index, &walker, project.path(), |_, _| {}).unwrap();

    fs::remove_file(notes).unwrap();
    fs::write(app, "def app(): return 2").unwrap();

    let report = sync_folder(&index, &walker, project.path(), |_, _| {}).unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.removed, 1);
    assert!(index.document("notes.md").is_none());
    assert_eq!(index.tracked_files(), vec!["app.py"]);
    assert_eq!(index.stats().vector_count, 1);
}

#[test]
fn test_sync_respects_ignore_files() {
    let project = TestProject::new();
    let state = TempDir::new().unwrap();
    let index = open_index(&test_settings(state.path()));
    let walker = FileWalker::new(TrackingConfig::default());

    project.add_file(".trackdexignore", "drafts/\n");
    project.add_file("drafts/wip.py", "def wip(): pass");
    project.add_file("done.py", "def done(): pass");

    let report = sync_folder(&index, &walker, project.path(), |_, _| {}).unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(index.tracked_files(), vec!["done.py"]);
}

#[test]
fn test_sync_keeps_conversation_snippets() {
    let project = TestProject::new();
    let state = TempDir::new().unwrap();
    let index = open_index(&test_settings(state.path()));
    let walker = FileWalker::new(TrackingConfig::default());

    index
        .ingest("chat/1", "user asked how the parser recovers", DocType::conversation())
        .unwrap();
    index.flush().unwrap();
    index
        .ingest("chat/2", "still buffered while the sync runs", DocType::conversation())
        .unwrap();
    project.add_file("parser.py", "def recover(): pass");

    let report = sync_folder(&index, &walker, project.path(), |_, _| {}).unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(index.tracked_files(), vec!["chat/1", "chat/2", "parser.py"]);
    assert_eq!(index.doc_type("chat/1"), Some(DocType::conversation()));
    assert_eq!(index.doc_type("chat/2"), Some(DocType::conversation()));

    let hits = index.search_by_type("how the parser recovers", "conversation", 5);
    assert_eq!(hits.len(), 2);
}
