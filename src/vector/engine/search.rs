//! Similarity search.

use std::time::Instant;

use log::debug;

use crate::error::{RagStoreError, Result};
use crate::vector::backend::AnnQuery;
use crate::vector::engine::assembler::{self, ResultAssembler};
use crate::vector::engine::request::SearchRequest;
use crate::vector::engine::response::SearchResponse;
use crate::vector::engine::{VectorStore, engine_error};

impl VectorStore {
    /// Rank the records of a loaded collection against the request vector.
    ///
    /// Results are best first (highest similarity for cosine and inner
    /// product, lowest distance for L2); ties go to the earlier-inserted
    /// record. Only records passing the filter count toward `top_k`. No match
    /// is an empty response, not an error.
    pub fn search(&self, collection: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        request.validate()?;
        let filter = request.filter_expr()?;

        let backend = self.backend()?;
        let info = backend
            .describe_collection(collection)
            .map_err(engine_error)?;
        request.validate_dimension(info.schema.dimension)?;
        if !info.loaded {
            return Err(RagStoreError::not_loaded(collection));
        }

        let query = AnnQuery {
            vector: request.vector.clone(),
            top_k: request.top_k,
            ef: request.effective_ef(self.config.search.min_ef),
            filter,
            output_fields: assembler::output_fields(),
            include_vector: request.output_vector,
        };
        let hits = backend.search(collection, &query).map_err(engine_error)?;
        let results =
            ResultAssembler::new(request.decode_metadata, request.output_vector).assemble(hits);

        let took_ms = started.elapsed().as_millis() as u64;
        debug!(
            "search on {collection}: {} results (ef {}) in {took_ms} ms",
            results.len(),
            query.ef
        );
        Ok(SearchResponse {
            collection: collection.to_string(),
            results,
            query_vector: request.output_vector.then(|| request.vector.clone()),
            took_ms,
        })
    }

    /// Search `request.collection_name`, or the configured default
    /// collection when the request names none.
    pub fn search_default(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let collection = request
            .collection_name
            .as_deref()
            .unwrap_or(&self.config.collection.name);
        self.search(collection, request)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::error::RagStoreError;
    use crate::vector::core::distance::Metric;
    use crate::vector::engine::{SearchRequest, VectorStore};
    use crate::vector::index::IndexSpec;
    use crate::vector::record::VectorRecord;

    fn loaded_store(metric: Metric) -> VectorStore {
        let store = VectorStore::open(StoreConfig::default()).unwrap();
        store.create_collection("docs", 2, metric, "").unwrap();
        store.load_collection("docs").unwrap();
        store
    }

    #[test]
    fn test_validation_precedes_backend() {
        let store = loaded_store(Metric::Cosine);
        assert!(matches!(
            store.search("missing", &SearchRequest::new(vec![1.0, 0.0]).with_top_k(0)),
            Err(RagStoreError::ValidationError(_))
        ));
        assert!(matches!(
            store.search("missing", &SearchRequest::new(vec![1.0, 0.0])),
            Err(RagStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.search("docs", &SearchRequest::new(vec![1.0, 0.0, 0.0])),
            Err(RagStoreError::ValidationError(_))
        ));
        assert!(matches!(
            store.search("docs", &SearchRequest::new(vec![1.0, 0.0]).with_filter("owner == 'x'")),
            Err(RagStoreError::ValidationError(_))
        ));
    }

    #[test]
    fn test_not_loaded() {
        let store = VectorStore::open(StoreConfig::default()).unwrap();
        store.create_collection("docs", 2, Metric::Cosine, "").unwrap();
        assert!(matches!(
            store.search("docs", &SearchRequest::new(vec![1.0, 0.0])),
            Err(RagStoreError::CollectionNotLoaded(_))
        ));
    }

    #[test]
    fn test_l2_orders_lowest_distance_first() {
        let store = loaded_store(Metric::L2);
        store
            .create_index("docs", &IndexSpec::hnsw(Metric::L2))
            .unwrap();
        store
            .batch_insert(
                "docs",
                vec![
                    VectorRecord::new("far", vec![3.0, 4.0]),
                    VectorRecord::new("near", vec![0.0, 1.0]),
                    VectorRecord::new("origin", vec![0.0, 0.0]),
                ],
            )
            .unwrap();

        let response = store
            .search("docs", &SearchRequest::new(vec![0.0, 0.0]).with_top_k(3))
            .unwrap();
        assert_eq!(response.ids(), vec!["origin", "near", "far"]);
        let scores: Vec<f32> = response.results.iter().map(|r| r.score).collect();
        assert!((scores[0] - 0.0).abs() < 1e-6);
        assert!((scores[1] - 1.0).abs() < 1e-6);
        assert!((scores[2] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let store = loaded_store(Metric::InnerProduct);
        store
            .batch_insert(
                "docs",
                vec![
                    VectorRecord::new("b", vec![1.0, 0.0]),
                    VectorRecord::new("a", vec![1.0, 0.0]),
                    VectorRecord::new("c", vec![1.0, 0.0]),
                ],
            )
            .unwrap();
        let request = SearchRequest::new(vec![2.0, 0.0]).with_top_k(3);
        let first = store.search("docs", &request).unwrap();
        assert_eq!(first.ids(), vec!["b", "a", "c"]);
        assert!((first.results[0].score - 2.0).abs() < 1e-6);
        assert_eq!(store.search("docs", &request).unwrap().ids(), first.ids());
    }

    #[test]
    fn test_output_vector_and_default_collection() {
        let config = StoreConfig::default().with_default_collection("docs");
        let store = VectorStore::open(config).unwrap();
        store.create_collection("docs", 2, Metric::Cosine, "").unwrap();
        store.load_collection("docs").unwrap();
        store
            .batch_insert("docs", vec![VectorRecord::new("a", vec![0.6, 0.8])])
            .unwrap();

        let response = store
            .search_default(&SearchRequest::new(vec![1.0, 0.0]).with_output_vector(true))
            .unwrap();
        assert_eq!(response.collection, "docs");
        assert_eq!(response.query_vector, Some(vec![1.0, 0.0]));
        assert_eq!(response.results[0].vector, Some(vec![0.6, 0.8]));
        assert!((response.results[0].score - 0.6).abs() < 1e-6);

        let response = store
            .search_default(&SearchRequest::new(vec![1.0, 0.0]))
            .unwrap();
        assert!(response.query_vector.is_none());
        assert!(response.results[0].vector.is_none());
    }
}
