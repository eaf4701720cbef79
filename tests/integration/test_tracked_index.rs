//! Behaviour of the tracked index through its public API.

use std::sync::Arc;

use tempfile::TempDir;
use trackdex::vector::StructureKind;
use trackdex::{DocType, IndexError, IndexOutcome, SearchFilter, TrackedIndex};

use crate::common::{
    FailingGenerator, TEST_DIMENSION, create_test_index, open_index, sample_source, test_settings,
};

#[test]
fn test_reindexing_same_content_keeps_one_document() {
    let (index, _dir) = create_test_index();

    let first = index.ingest("A.py", "def foo(): pass", "code").unwrap();
    assert_eq!(first, IndexOutcome::Staged);
    let second = index.ingest("A.py", "def foo(): pass", "code").unwrap();
    assert_eq!(second, IndexOutcome::Unchanged);

    index.flush().unwrap();
    assert_eq!(index.stats().vector_count, 1);

    // Bypassing the gate replaces instead of duplicating
    index.index("A.py", "def foo(): pass", "code").unwrap();
    let report = index.flush().unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(index.stats().vector_count, 1);
}

#[test]
fn test_buffered_documents_are_searchable() {
    let (index, _dir) = create_test_index();

    for i in 0..3 {
        index.ingest(&format!("f{i}.py"), &sample_source(i), "code").unwrap();
    }
    let stats = index.stats();
    assert_eq!(stats.buffered, 3);
    assert_eq!(stats.vector_count, 0);

    let hits = index.search(&sample_source(1), 10);
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].path, "f1.py");
    assert_eq!(index.stats().buffered, 0);
}

#[test]
fn test_full_buffer_flushes_on_stage() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = test_settings(temp_dir.path());
    settings.index.buffer_size = 2;
    let index = open_index(&settings);

    assert_eq!(
        index.ingest("a.py", &sample_source(0), "code").unwrap(),
        IndexOutcome::Staged
    );
    match index.ingest("b.py", &sample_source(1), "code").unwrap() {
        IndexOutcome::Flushed(report) => {
            assert_eq!(report.inserted, 2);
            assert!(report.saved);
        }
        other => panic!("expected a flush, got {other:?}"),
    }
    assert_eq!(index.stats().vector_count, 2);
}

#[test]
fn test_results_ordered_by_similarity() {
    let (index, _dir) = create_test_index();
    for i in 0..10 {
        index.ingest(&format!("f{i}.py"), &sample_source(i), "code").unwrap();
    }

    let hits = index.search("def handler_4(request): return total", 5);
    assert_eq!(hits.len(), 5);
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    for hit in &hits {
        assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
        assert!((hit.similarity - 1.0 / (1.0 + hit.distance)).abs() < 1e-6);
    }

    // k larger than the index is clamped
    assert_eq!(index.search("anything", 100).len(), 10);
    assert!(index.search("anything", 0).is_empty());
}

#[test]
fn test_upgrade_happens_at_threshold() {
    let (index, _dir) = create_test_index();

    for i in 0..39 {
        index.ingest(&format!("f{i}.py"), &sample_source(i), "code").unwrap();
    }
    let report = index.flush().unwrap();
    assert!(!report.upgraded);
    assert_eq!(report.structure_kind, StructureKind::Flat);
    assert_eq!(index.stats().partitions, 0);

    index.ingest("f39.py", &sample_source(39), "code").unwrap();
    let report = index.flush().unwrap();
    assert!(report.upgraded);

    let stats = index.stats();
    assert_eq!(stats.structure_kind, StructureKind::Partitioned);
    assert!(stats.trained);
    assert_eq!(stats.vector_count, 40);
    assert_eq!(stats.partitions, 4);

    // Every document stays reachable after the upgrade
    let hits = index.search(&sample_source(17), 1);
    assert_eq!(hits[0].path, "f17.py");
}

#[test]
fn test_removed_document_is_never_returned() {
    let (index, _dir) = create_test_index();
    index.ingest("A.py", "def foo(): pass", "code").unwrap();
    index.ingest("B.py", "def bar(): pass", "code").unwrap();
    index.flush().unwrap();
    let old_id = index.document("A.py").unwrap().vector_id;

    assert!(index.remove("A.py"));
    assert!(!index.remove("A.py"));
    let hits = index.search("def foo(): pass", 5);
    assert!(hits.iter().all(|hit| hit.path != "A.py"));

    // Same content again is a fresh insert, not a suppressed duplicate
    let outcome = index.ingest("A.py", "def foo(): pass", "code").unwrap();
    assert_eq!(outcome, IndexOutcome::Staged);
    index.flush().unwrap();
    let new_id = index.document("A.py").unwrap().vector_id;
    assert!(new_id > old_id);
    assert_eq!(index.search("def foo(): pass", 1)[0].path, "A.py");
}

#[test]
fn test_closest_file_ranks_first() {
    let (index, _dir) = create_test_index();
    index.ingest("A.py", "def foo(): pass", "code").unwrap();
    index.ingest("B.py", "def bar(): pass", "code").unwrap();
    index.ingest("C.py", "class Baz: pass", "code").unwrap();

    let hits = index.search("def foo(): pass", 2);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].path, "A.py");
    assert!(hits[1].path == "B.py" || hits[1].path == "C.py");
    for hit in &hits {
        assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
    }
}

#[test]
fn test_search_by_type_filters_before_ranking() {
    let (index, _dir) = create_test_index();
    for i in 0..10 {
        index.ingest(&format!("f{i}.py"), &sample_source(i), "code").unwrap();
    }
    index
        .ingest("chat/1", "user asked how to bake sourdough bread", DocType::conversation())
        .unwrap();
    index
        .ingest("chat/2", "assistant explained rising times for dough", DocType::conversation())
        .unwrap();

    let query = sample_source(3);
    let unfiltered = index.search(&query, 2);
    assert!(unfiltered.iter().all(|hit| hit.doc_type == DocType::code()));

    let conversations = index.search_by_type(&query, "conversation", 2);
    assert_eq!(conversations.len(), 2);
    assert!(conversations.iter().all(|hit| hit.doc_type == DocType::conversation()));

    assert!(index.search_by_type(&query, "notes", 2).is_empty());
    assert_eq!(index.stats().type_counts.get(&DocType::conversation()), Some(&2));
}

#[test]
fn test_stage_rejects_wrong_dimension() {
    let (index, _dir) = create_test_index();

    let err = index.stage("x.py", vec![0.5; 3], "code").unwrap_err();
    assert!(matches!(
        err,
        IndexError::DimensionMismatch {
            expected: TEST_DIMENSION,
            actual: 3
        }
    ));
    assert!(!err.is_recoverable());
    assert_eq!(index.stats().buffered, 0);

    index.stage("x.py", vec![0.5; TEST_DIMENSION], "code").unwrap();
    let hits = index.search_vector(&vec![0.5; TEST_DIMENSION], 1).unwrap();
    assert_eq!(hits[0].path, "x.py");
    assert_eq!(hits[0].similarity, 1.0);

    assert!(matches!(
        index.search_vector(&[1.0], 1),
        Err(IndexError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_embedding_failure_rolls_back_digest() {
    let temp_dir = TempDir::new().unwrap();
    let settings = test_settings(temp_dir.path());
    let index = TrackedIndex::open(&settings, Box::new(FailingGenerator::new("flaky"))).unwrap();

    let err = index.ingest("bad.py", "FAIL to embed", "code").unwrap_err();
    assert!(matches!(err, IndexError::EmbeddingFailed { .. }));
    assert!(err.is_recoverable());
    assert!(index.tracked_files().is_empty());

    // The same content is reported as changed again, so it will be retried
    assert!(index.notify_changed("bad.py", "FAIL to embed"));

    index.ingest("good.py", "def ok(): pass", "code").unwrap();
    assert_eq!(index.search("def ok(): pass", 5).len(), 1);

    // A failing query yields no results rather than an error
    assert!(index.search("FAIL", 5).is_empty());
}

#[test]
fn test_search_with_threshold_drops_distant_hits() {
    let (index, _dir) = create_test_index();
    index.ingest("A.py", "def foo(): pass", "code").unwrap();
    index.ingest("Z.md", "completely unrelated prose about mountains", "code").unwrap();

    let hits = index.search_with_threshold("def foo(): pass", 5, 0.99);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "A.py");
}

#[test]
fn test_concurrent_search_and_ingest() {
    let (index, _dir) = create_test_index();
    let index = Arc::new(index);

    std::thread::scope(|scope| {
        let writer = Arc::clone(&index);
        scope.spawn(move || {
            for i in 0..30 {
                writer.ingest(&format!("f{i}.py"), &sample_source(i), "code").unwrap();
            }
        });
        for _ in 0..3 {
            let reader = Arc::clone(&index);
            scope.spawn(move || {
                for _ in 0..20 {
                    let hits = reader.search(&sample_source(2), 3);
                    assert!(hits.len() <= 3);
                }
            });
        }
    });

    index.flush().unwrap();
    assert_eq!(index.stats().vector_count, 30);
}

#[test]
fn test_search_filtered_combines_type_and_threshold() {
    let (index, _dir) = create_test_index();
    index.ingest("A.py", "def foo(): pass", "code").unwrap();
    index.ingest("chat/1", "def foo(): pass", DocType::conversation()).unwrap();
    index
        .ingest("chat/2", "unrelated prose about mountains", DocType::conversation())
        .unwrap();

    let filter = SearchFilter {
        doc_type: Some(DocType::conversation()),
        min_similarity: Some(0.99),
    };
    let hits = index.search_filtered("def foo(): pass", 5, &filter);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "chat/1");

    // The shorthand searches agree with the combined one
    assert_eq!(
        index.search_with_threshold("def foo(): pass", 5, 0.99).len(),
        2
    );
    assert_eq!(index.search_by_type("def foo(): pass", "conversation", 5).len(), 2);
}
