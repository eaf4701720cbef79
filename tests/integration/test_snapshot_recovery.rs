//! Reopening an index from disk, and what happens when the artifacts are bad.

use std::fs;

use tempfile::TempDir;
use trackdex::index::{INDEX_FILE, METADATA_FILE, SnapshotMetadata};
use trackdex::vector::StructureKind;
use trackdex::{IndexOutcome, TrackedIndex};

use crate::common::{FailingGenerator, open_index, sample_source, test_settings};

fn build_index(dir: &TempDir, documents: usize) {
    let index = open_index(&test_settings(dir.path()));
    for i in 0..documents {
        index
            .ingest(&format!("f{i}.py"), &sample_source(i), "code")
            .unwrap();
    }
    index.close().unwrap();
}

#[test]
fn test_reopen_returns_identical_results() {
    let temp_dir = TempDir::new().unwrap();
    let settings = test_settings(temp_dir.path());

    let index = open_index(&settings);
    for i in 0..45 {
        index
            .ingest(&format!("f{i}.py"), &sample_source(i), "code")
            .unwrap();
    }
    index.flush().unwrap();
    let queries = [sample_source(5), "return total".to_string(), sample_source(44)];
    let before: Vec<_> = queries.iter().map(|q| index.search(q, 5)).collect();
    let stats_before = index.stats();
    index.close().unwrap();

    let index = open_index(&settings);
    let stats = index.stats();
    assert_eq!(stats.structure_kind, StructureKind::Partitioned);
    assert_eq!(stats.vector_count, stats_before.vector_count);
    assert_eq!(stats.partitions, stats_before.partitions);
    assert_eq!(stats.generation, stats_before.generation);
    assert_eq!(stats.tracked_files, 45);

    let after: Vec<_> = queries.iter().map(|q| index.search(q, 5)).collect();
    assert_eq!(before, after);

    // Digests survive the restart, so unchanged files are not re-embedded
    assert_eq!(
        index.ingest("f3.py", &sample_source(3), "code").unwrap(),
        IndexOutcome::Unchanged
    );
}

#[test]
fn test_removal_persists_on_close() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 3);

    let settings = test_settings(temp_dir.path());
    let index = open_index(&settings);
    assert!(index.remove("f1.py"));
    index.close().unwrap();

    let index = open_index(&settings);
    assert!(index.document("f1.py").is_none());
    assert_eq!(index.stats().vector_count, 2);
    assert_eq!(index.tracked_files(), vec!["f0.py", "f2.py"]);
}

#[test]
fn test_metadata_describes_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 2);

    let path = temp_dir.path().join("index").join(METADATA_FILE);
    let metadata: SnapshotMetadata = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    assert_eq!(metadata.model_name, "hashing");
    assert_eq!(metadata.vector_count, 2);
    assert_eq!(metadata.structure_kind, StructureKind::Flat);
    assert!(metadata.trained);
    assert_eq!(metadata.documents.len(), 2);
    assert_eq!(metadata.hashes.len(), 2);
}

#[test]
fn test_corrupt_artifacts_fall_back_to_empty_index() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 3);

    let index_dir = temp_dir.path().join("index");
    fs::write(index_dir.join(INDEX_FILE), b"not an index").unwrap();

    let index = open_index(&test_settings(temp_dir.path()));
    let stats = index.stats();
    assert_eq!(stats.vector_count, 0);
    assert_eq!(stats.structure_kind, StructureKind::Flat);
    assert!(index.tracked_files().is_empty());

    // The index is fully usable and overwrites the bad snapshot
    index.ingest("new.py", "def new(): pass", "code").unwrap();
    index.close().unwrap();
    let index = open_index(&test_settings(temp_dir.path()));
    assert_eq!(index.stats().vector_count, 1);
}

#[test]
fn test_partial_pair_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 3);
    fs::remove_file(temp_dir.path().join("index").join(METADATA_FILE)).unwrap();

    let index = open_index(&test_settings(temp_dir.path()));
    assert_eq!(index.stats().vector_count, 0);
}

#[test]
fn test_mismatched_generations_are_ignored() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    build_index(&first, 2);

    // Two flushes move the second index to a later generation
    let index = open_index(&test_settings(second.path()));
    index.ingest("a.py", &sample_source(0), "code").unwrap();
    index.flush().unwrap();
    index.ingest("b.py", &sample_source(1), "code").unwrap();
    index.close().unwrap();

    fs::copy(
        second.path().join("index").join(METADATA_FILE),
        first.path().join("index").join(METADATA_FILE),
    )
    .unwrap();

    let index = open_index(&test_settings(first.path()));
    assert_eq!(index.stats().vector_count, 0);
}

#[test]
fn test_other_model_snapshot_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 3);

    let index = TrackedIndex::open(
        &test_settings(temp_dir.path()),
        Box::new(FailingGenerator::new("other-model")),
    )
    .unwrap();
    assert_eq!(index.stats().vector_count, 0);
    assert_eq!(index.stats().model_name, "other-model");
}

#[test]
fn test_other_dimension_snapshot_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    build_index(&temp_dir, 3);

    let mut settings = test_settings(temp_dir.path());
    settings.index.dimension = 32;
    let generator = trackdex::HashingEmbeddingGenerator::new(
        trackdex::VectorDimension::new(32).unwrap(),
    );
    let index = TrackedIndex::open(&settings, Box::new(generator)).unwrap();
    assert_eq!(index.stats().vector_count, 0);
    assert_eq!(index.stats().dimension, 32);
}

#[test]
fn test_failed_save_keeps_state_and_retries() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocked");
    fs::write(&blocker, "a regular file where a directory belongs").unwrap();

    let mut settings = test_settings(temp_dir.path());
    settings.index_path = blocker.join("index");
    let index = open_index(&settings);

    index.ingest("A.py", "def foo(): pass", "code").unwrap();
    let report = index.flush().unwrap();
    assert!(!report.saved);
    assert!(report.save_error.is_some());
    assert_eq!(report.vector_count, 1);
    assert_eq!(index.stats().vector_count, 1);
    assert_eq!(index.search("def foo(): pass", 1)[0].path, "A.py");

    fs::remove_file(&blocker).unwrap();

    // Nothing is buffered; the unsaved state alone triggers the save
    let report = index.flush().unwrap();
    assert_eq!(report.inserted, 0);
    assert!(report.saved);
    assert!(report.save_error.is_none());
    index.close().unwrap();

    let index = open_index(&settings);
    assert_eq!(index.stats().vector_count, 1);
    assert_eq!(index.search("def foo(): pass", 1)[0].path, "A.py");
}

#[test]
fn test_close_reports_failed_save() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocked");
    fs::write(&blocker, "not a directory").unwrap();

    let mut settings = test_settings(temp_dir.path());
    settings.index_path = blocker.join("index");
    let index = open_index(&settings);
    index.ingest("A.py", "def foo(): pass", "code").unwrap();

    let err = index.close().unwrap_err();
    assert!(matches!(err, trackdex::IndexError::Persistence { .. }));
    assert!(err.is_recoverable());
}
