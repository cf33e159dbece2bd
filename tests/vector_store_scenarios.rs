use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use ragstore::config::{ConnectionConfig, StoreConfig};
use ragstore::error::{RagStoreError, Result};
use ragstore::vector::backend::{
    AnnQuery, CollectionInfo, CollectionStats, EmbeddedBackend, RawHit, StoredRow, VectorBackend,
};
use ragstore::vector::filter::FilterExpr;
use ragstore::vector::index::{IndexDescription, IndexSpec};
use ragstore::vector::schema::CollectionSchema;
use ragstore::vector::session::Session;
use ragstore::{Metric, MetadataValue, SearchRequest, VectorRecord, VectorStore};

fn open_store() -> Result<VectorStore> {
    VectorStore::open(StoreConfig::default())
}

fn docs_store(dimension: i64, metric: Metric) -> Result<VectorStore> {
    let store = open_store()?;
    store.create_collection("docs", dimension, metric, "document chunks")?;
    store.create_index("docs", &IndexSpec::hnsw(metric))?;
    store.load_collection("docs")?;
    Ok(store)
}

#[test]
fn insert_rejects_any_vector_of_the_wrong_dimension() -> Result<()> {
    for dimension in [1_i64, 3, 8] {
        let store = docs_store(dimension, Metric::Cosine)?;
        let good = vec![0.5; dimension as usize];
        for bad_len in [0, dimension as usize - 1, dimension as usize + 1] {
            if bad_len == 0 && dimension == 1 {
                continue;
            }
            let result = store.batch_insert(
                "docs",
                vec![
                    VectorRecord::new("ok", good.clone()),
                    VectorRecord::new("bad", vec![0.5; bad_len]),
                ],
            );
            assert!(
                matches!(result, Err(RagStoreError::DimensionMismatch { .. })),
                "dimension {dimension}, length {bad_len}"
            );
        }
        // The batch failed as a whole.
        assert_eq!(store.collection_stats("docs")?.row_count, 0);
    }
    Ok(())
}

#[test]
fn create_collection_twice_keeps_the_first_schema() -> Result<()> {
    let store = open_store()?;
    assert!(store.create_collection("docs", 3, Metric::Cosine, "")?);
    assert!(store.create_collection("docs", 768, Metric::L2, "")?);

    let schema = store.describe_collection("docs")?.schema;
    assert_eq!(schema.dimension, 3);
    assert_eq!(schema.metric, Metric::Cosine);
    assert_eq!(store.list_collections()?, vec!["docs"]);
    Ok(())
}

#[test]
fn create_collection_rejects_non_positive_dimension() -> Result<()> {
    let store = open_store()?;
    for dimension in [0, -1] {
        assert!(matches!(
            store.create_collection("docs", dimension, Metric::Cosine, ""),
            Err(RagStoreError::InvalidSchema(_))
        ));
    }
    assert!(!store.exists("docs")?);
    Ok(())
}

#[test]
fn inserted_records_are_searchable_on_return() -> Result<()> {
    let store = docs_store(4, Metric::Cosine)?;
    for i in 0..20 {
        let vector = vec![i as f32, 1.0, (i % 3) as f32, 0.5];
        let id = format!("r{i}");
        store.batch_insert("docs", vec![VectorRecord::new(id.clone(), vector.clone())])?;

        let response = store.search("docs", &SearchRequest::new(vector).with_top_k(1))?;
        assert_eq!(response.ids(), vec![id.as_str()]);
    }
    Ok(())
}

#[test]
fn delete_by_ids_is_idempotent() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    store.batch_insert(
        "docs",
        vec![
            VectorRecord::new("x", vec![1.0, 0.0]),
            VectorRecord::new("y", vec![0.0, 1.0]),
        ],
    )?;

    for _ in 0..2 {
        assert!(store.delete_by_ids("docs", &["x"])?);
        let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(10))?;
        assert_eq!(response.ids(), vec!["y"]);
    }
    assert!(store.delete_by_ids("docs", &["never-inserted"])?);
    Ok(())
}

#[test]
fn delete_by_ids_requires_the_collection() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    let none: [&str; 0] = [];
    assert!(store.delete_by_ids("docs", &none)?);
    for ids in [&none[..], &["x"][..]] {
        assert!(matches!(
            store.delete_by_ids("missing", ids),
            Err(RagStoreError::NotFound(_))
        ));
    }
    Ok(())
}

#[test]
fn delete_by_owning_document_cascades() -> Result<()> {
    let store = docs_store(3, Metric::L2)?;
    store.batch_insert(
        "docs",
        vec![
            VectorRecord::new("r1", vec![1.0, 0.0, 0.0]).with_doc_id("d1"),
            VectorRecord::new("r2", vec![0.0, 1.0, 0.0]).with_doc_id("d1"),
            VectorRecord::new("r3", vec![0.0, 0.0, 1.0]).with_doc_id("d2"),
        ],
    )?;

    assert!(store.delete_by_owning_document("docs", "d1")?);
    assert!(store.delete_by_owning_document("docs", "d1")?);

    for query in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [5.0, 5.0, 5.0]] {
        let response = store.search("docs", &SearchRequest::new(query.to_vec()).with_top_k(10))?;
        assert_eq!(response.ids(), vec!["r3"]);
    }
    Ok(())
}

#[test]
fn top_k_bounds() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    store.batch_insert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0])])?;

    for top_k in [0, 101] {
        assert!(matches!(
            store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(top_k)),
            Err(RagStoreError::ValidationError(_))
        ));
    }
    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(100))?;
    assert_eq!(response.results.len(), 1);
    Ok(())
}

#[test]
fn exact_match_scores_one_under_cosine() -> Result<()> {
    let store = docs_store(3, Metric::Cosine)?;
    store.batch_insert(
        "docs",
        vec![VectorRecord::new("a", vec![1.0, 0.0, 0.0]).with_doc_id("d1")],
    )?;

    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0, 0.0]).with_top_k(1))?;
    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert_eq!(hit.id, "a");
    assert_eq!(hit.doc_id, "d1");
    assert_eq!(hit.content, "");
    assert!(hit.metadata.is_empty());
    assert!((hit.score - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn search_with_no_match_is_empty_not_an_error() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]))?;
    assert!(response.results.is_empty());

    store.batch_insert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0]).with_doc_id("d1")])?;
    let response = store.search(
        "docs",
        &SearchRequest::new(vec![1.0, 0.0]).with_filter("doc_id == 'other'"),
    )?;
    assert!(response.results.is_empty());
    Ok(())
}

#[test]
fn filters_apply_before_top_k() -> Result<()> {
    let store = docs_store(2, Metric::InnerProduct)?;
    let records: Vec<VectorRecord> = (0..50)
        .map(|i| {
            VectorRecord::new(format!("r{i}"), vec![1.0 + i as f32, 0.0])
                .with_doc_id(if i % 10 == 0 { "rare" } else { "common" })
                .with_metadata_entry("page", i as f64)
        })
        .collect();
    store.batch_insert("docs", records)?;

    let response = store.search(
        "docs",
        &SearchRequest::new(vec![1.0, 0.0])
            .with_top_k(3)
            .with_filter("doc_id == 'rare'"),
    )?;
    assert_eq!(response.ids(), vec!["r40", "r30", "r20"]);

    let response = store.search(
        "docs",
        &SearchRequest::new(vec![1.0, 0.0])
            .with_top_k(5)
            .with_filter("metadata.page < 3")
            .with_equality("doc_id", serde_json::json!("common")),
    )?;
    assert_eq!(response.ids(), vec!["r2", "r1"]);
    assert_eq!(
        response.results[0]
            .metadata
            .get("page")
            .and_then(MetadataValue::as_f64),
        Some(2.0)
    );
    Ok(())
}

#[test]
fn search_is_deterministic_for_a_fixed_snapshot() -> Result<()> {
    for spec in [
        IndexSpec::flat(Metric::L2),
        IndexSpec::hnsw(Metric::L2).with_m(8),
        IndexSpec::ivf_flat(Metric::L2).with_nlist(8).with_nprobe(2),
    ] {
        let store = open_store()?;
        store.create_collection("docs", 8, Metric::L2, "")?;
        store.create_index("docs", &spec)?;
        store.load_collection("docs")?;

        let records: Vec<VectorRecord> = (0..200)
            .map(|i| {
                let v: Vec<f32> = (0..8).map(|j| ((i * 7 + j * 13) % 17) as f32).collect();
                VectorRecord::new(format!("r{i}"), v)
            })
            .collect();
        store.batch_insert("docs", records)?;

        let request = SearchRequest::new(vec![3.0; 8]).with_top_k(10);
        let first = store.search("docs", &request)?;
        assert_eq!(first.results.len(), 10);
        for _ in 0..5 {
            assert_eq!(store.search("docs", &request)?.ids(), first.ids());
        }
        let scores: Vec<f32> = first.results.iter().map(|r| r.score).collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]), "{scores:?}");
    }
    Ok(())
}

#[test]
fn upsert_replaces_the_previous_value() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    store.batch_insert(
        "docs",
        vec![VectorRecord::new("a", vec![1.0, 0.0]).with_content("first")],
    )?;
    store.batch_insert(
        "docs",
        vec![VectorRecord::new("a", vec![0.0, 1.0]).with_content("second")],
    )?;

    assert_eq!(store.collection_stats("docs")?.row_count, 1);
    let response = store.search("docs", &SearchRequest::new(vec![0.0, 1.0]).with_top_k(5))?;
    assert_eq!(response.ids(), vec!["a"]);
    assert_eq!(response.results[0].content, "second");
    Ok(())
}

#[test]
fn unloaded_and_missing_collections() -> Result<()> {
    let store = open_store()?;
    assert!(matches!(
        store.load_collection("docs"),
        Err(RagStoreError::NotFound(_))
    ));
    assert!(matches!(
        store.drop_collection("docs"),
        Err(RagStoreError::NotFound(_))
    ));

    store.create_collection("docs", 2, Metric::Cosine, "")?;
    assert!(matches!(
        store.search("docs", &SearchRequest::new(vec![1.0, 0.0])),
        Err(RagStoreError::CollectionNotLoaded(_))
    ));
    assert!(store.load_collection("docs")?);
    assert!(store.load_collection("docs")?);
    assert!(store.search("docs", &SearchRequest::new(vec![1.0, 0.0])).is_ok());

    store.drop_collection("docs")?;
    assert!(!store.exists("docs")?);
    Ok(())
}

#[test]
fn concurrent_inserts_see_their_own_writes() -> Result<()> {
    let store = docs_store(4, Metric::Cosine)?;
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..10 {
                    let id = format!("t{t}-{i}");
                    let vector = vec![t as f32 + 1.0, i as f32, 1.0, 0.25];
                    store.batch_insert("docs", vec![VectorRecord::new(id.clone(), vector.clone())])?;
                    let response = store.search(
                        "docs",
                        &SearchRequest::new(vector).with_filter(format!("id == '{id}'")),
                    )?;
                    assert_eq!(response.ids(), vec![id.as_str()]);
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| RagStoreError::ThreadJoin("insert thread panicked".to_string()))??;
    }
    assert_eq!(store.collection_stats("docs")?.row_count, 80);
    Ok(())
}

/// Wraps the embedded backend and fails selected calls as a lost connection
/// would.
#[derive(Debug)]
struct FlakyBackend {
    inner: EmbeddedBackend,
    fail_flush: AtomicBool,
    fail_all: AtomicBool,
}

impl FlakyBackend {
    fn new() -> Self {
        FlakyBackend {
            inner: EmbeddedBackend::in_memory(42),
            fail_flush: AtomicBool::new(false),
            fail_all: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
        }
        Ok(())
    }
}

impl VectorBackend for FlakyBackend {
    fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping()
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        self.check()?;
        self.inner.has_collection(name)
    }

    fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.check()?;
        self.inner.create_collection(schema)
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.check()?;
        self.inner.describe_collection(name)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_collections()
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.check()?;
        self.inner.drop_collection(name)
    }

    fn load_collection(&self, name: &str) -> Result<()> {
        self.check()?;
        self.inner.load_collection(name)
    }

    fn release_collection(&self, name: &str) -> Result<()> {
        self.check()?;
        self.inner.release_collection(name)
    }

    fn create_index(&self, name: &str, index: &IndexDescription) -> Result<()> {
        self.check()?;
        self.inner.create_index(name, index)
    }

    fn drop_index(&self, name: &str, field: &str) -> Result<bool> {
        self.check()?;
        self.inner.drop_index(name, field)
    }

    fn insert(&self, name: &str, rows: Vec<StoredRow>) -> Result<u64> {
        self.check()?;
        self.inner.insert(name, rows)
    }

    fn flush(&self, name: &str) -> Result<()> {
        self.check()?;
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(RagStoreError::storage("flush interrupted"));
        }
        self.inner.flush(name)
    }

    fn discard(&self, name: &str, token: u64) -> Result<usize> {
        self.check()?;
        self.inner.discard(name, token)
    }

    fn delete(&self, name: &str, filter: &FilterExpr) -> Result<usize> {
        self.check()?;
        self.inner.delete(name, filter)
    }

    fn search(&self, name: &str, query: &AnnQuery) -> Result<Vec<RawHit>> {
        self.check()?;
        self.inner.search(name, query)
    }

    fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.check()?;
        self.inner.collection_stats(name)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn flaky_store() -> Result<(VectorStore, Arc<FlakyBackend>)> {
    let backend = Arc::new(FlakyBackend::new());
    let session = Session::open(&ConnectionConfig::default(), backend.clone())?;
    let store = VectorStore::new(session, StoreConfig::default())?;
    store.create_collection("docs", 2, Metric::Cosine, "")?;
    store.load_collection("docs")?;
    Ok((store, backend))
}

#[test]
fn backend_failures_surface_as_engine_unavailable() -> Result<()> {
    let (store, backend) = flaky_store()?;
    store.batch_insert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0])])?;
    backend.fail_all.store(true, Ordering::SeqCst);

    let unavailable = |result: Result<()>| matches!(result, Err(RagStoreError::EngineUnavailable(_)));
    assert!(unavailable(
        store.search("docs", &SearchRequest::new(vec![1.0, 0.0])).map(|_| ())
    ));
    assert!(unavailable(
        store
            .batch_insert("docs", vec![VectorRecord::new("b", vec![0.0, 1.0])])
            .map(|_| ())
    ));
    assert!(unavailable(store.delete_by_ids("docs", &["a"]).map(|_| ())));
    assert!(unavailable(
        store.delete_by_owning_document("docs", "d1").map(|_| ())
    ));
    assert!(unavailable(
        store.create_collection("other", 2, Metric::Cosine, "").map(|_| ())
    ));

    // Validation still runs first.
    assert!(matches!(
        store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(0)),
        Err(RagStoreError::ValidationError(_))
    ));

    backend.fail_all.store(false, Ordering::SeqCst);
    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]))?;
    assert_eq!(response.ids(), vec!["a"]);
    Ok(())
}

#[test]
fn failed_flush_exposes_no_part_of_the_batch() -> Result<()> {
    let (store, backend) = flaky_store()?;
    backend.fail_flush.store(true, Ordering::SeqCst);

    let result = store.batch_insert(
        "docs",
        vec![
            VectorRecord::new("a", vec![1.0, 0.0]),
            VectorRecord::new("b", vec![0.0, 1.0]),
        ],
    );
    assert!(matches!(result, Err(RagStoreError::EngineUnavailable(_))));
    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(10))?;
    assert!(response.results.is_empty());
    assert_eq!(store.collection_stats("docs")?.pending_row_count, 0);

    // A later successful flush publishes only its own batch.
    backend.fail_flush.store(false, Ordering::SeqCst);
    store.batch_insert("docs", vec![VectorRecord::new("c", vec![0.5, 0.5])])?;
    let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(10))?;
    assert_eq!(response.ids(), vec!["c"]);
    Ok(())
}

#[test]
fn shutdown_makes_the_store_unavailable() -> Result<()> {
    let store = docs_store(2, Metric::Cosine)?;
    let clone = store.clone();
    store.shutdown()?;
    assert!(matches!(
        clone.search("docs", &SearchRequest::new(vec![1.0, 0.0])),
        Err(RagStoreError::EngineUnavailable(_))
    ));
    assert!(matches!(
        clone.list_collections(),
        Err(RagStoreError::EngineUnavailable(_))
    ));
    Ok(())
}
