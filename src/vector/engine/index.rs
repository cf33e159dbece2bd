//! Index control.

use chrono::Utc;
use log::{error, info};

use crate::error::{RagStoreError, Result};
use crate::vector::engine::{VectorStore, engine_error};
use crate::vector::index::{IndexDescription, IndexSpec, ResolvedParams};

impl VectorStore {
    /// Build the index described by `spec` and block until it is queryable.
    ///
    /// Request problems are errors. A build failure inside the backend is
    /// logged and reported as `Ok(false)`; it is not retried. Building again
    /// with the same algorithm replaces the tuning parameters; switching
    /// algorithms requires [`VectorStore::drop_index`] first.
    pub fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<bool> {
        let backend = self.backend()?;
        let info = backend
            .describe_collection(collection)
            .map_err(engine_error)?;
        let schema = &info.schema;

        let vector_field = schema.vector_field().map(|f| f.name.as_str());
        if vector_field != Some(spec.field.as_str()) {
            return Err(RagStoreError::schema_mismatch(format!(
                "'{}' is not the vector field of collection '{collection}'",
                spec.field
            )));
        }
        if spec.metric != schema.metric {
            return Err(RagStoreError::schema_mismatch(format!(
                "index metric {} is incompatible with collection metric {}",
                spec.metric, schema.metric
            )));
        }

        let params = ResolvedParams::resolve(spec, &self.config.index.defaults)?;
        if let Some(existing) = &info.index {
            if existing.algorithm() != params.algorithm() {
                return Err(RagStoreError::schema_mismatch(format!(
                    "collection '{collection}' already has a {} index; drop it before building {}",
                    existing.algorithm(),
                    params.algorithm()
                )));
            }
        }

        let description = IndexDescription {
            field: spec.field.clone(),
            metric: spec.metric,
            params,
            built_at: Utc::now(),
        };
        match backend.create_index(collection, &description) {
            Ok(()) => {
                info!(
                    "index {} ready on {collection}.{}",
                    description.algorithm(),
                    description.field
                );
                Ok(true)
            }
            Err(err) => {
                error!(
                    "building {} index on {collection} failed: {err}",
                    description.algorithm()
                );
                Ok(false)
            }
        }
    }

    /// Drop the index on `field`. Returns whether an index was removed.
    /// Searches fall back to exact scans.
    pub fn drop_index(&self, collection: &str, field: &str) -> Result<bool> {
        let dropped = self
            .backend()?
            .drop_index(collection, field)
            .map_err(engine_error)?;
        if dropped {
            info!("dropped index on {collection}.{field}");
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::error::RagStoreError;
    use crate::vector::core::distance::Metric;
    use crate::vector::engine::VectorStore;
    use crate::vector::index::{IndexAlgorithm, IndexSpec, ResolvedParams};

    fn store_with_docs() -> VectorStore {
        let store = VectorStore::open(StoreConfig::default()).unwrap();
        store.create_collection("docs", 4, Metric::Cosine, "").unwrap();
        store
    }

    #[test]
    fn test_create_index_applies_defaults() {
        let store = store_with_docs();
        assert!(store.create_index("docs", &IndexSpec::hnsw(Metric::Cosine)).unwrap());

        let index = store.describe_collection("docs").unwrap().index.unwrap();
        assert_eq!(
            index.params,
            ResolvedParams::Hnsw {
                m: 16,
                ef_construction: 200
            }
        );
    }

    #[test]
    fn test_create_index_rejections() {
        let store = store_with_docs();
        assert!(matches!(
            store.create_index("missing", &IndexSpec::hnsw(Metric::Cosine)),
            Err(RagStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.create_index("docs", &IndexSpec::hnsw(Metric::Cosine).on_field("content")),
            Err(RagStoreError::SchemaMismatch(_))
        ));
        assert!(matches!(
            store.create_index("docs", &IndexSpec::hnsw(Metric::L2)),
            Err(RagStoreError::SchemaMismatch(_))
        ));
        assert!(matches!(
            store.create_index("docs", &IndexSpec::new("DISKANN", Metric::Cosine)),
            Err(RagStoreError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            store.create_index("docs", &IndexSpec::ivf_flat(Metric::Cosine).with_nlist(0)),
            Err(RagStoreError::ValidationError(_))
        ));
        assert!(store.describe_collection("docs").unwrap().index.is_none());
    }

    #[test]
    fn test_rebuild_replaces_params_but_not_algorithm() {
        let store = store_with_docs();
        store
            .create_index("docs", &IndexSpec::ivf_flat(Metric::Cosine).with_nlist(8))
            .unwrap();
        assert!(
            store
                .create_index("docs", &IndexSpec::ivf_flat(Metric::Cosine).with_nlist(16))
                .unwrap()
        );
        let index = store.describe_collection("docs").unwrap().index.unwrap();
        assert_eq!(
            index.params,
            ResolvedParams::IvfFlat {
                nlist: 16,
                nprobe: 16
            }
        );

        assert!(matches!(
            store.create_index("docs", &IndexSpec::hnsw(Metric::Cosine)),
            Err(RagStoreError::SchemaMismatch(_))
        ));

        assert!(store.drop_index("docs", "embedding").unwrap());
        assert!(!store.drop_index("docs", "embedding").unwrap());
        assert!(store.create_index("docs", &IndexSpec::flat(Metric::Cosine)).unwrap());
        assert_eq!(
            store
                .describe_collection("docs")
                .unwrap()
                .index
                .map(|i| i.algorithm()),
            Some(IndexAlgorithm::Flat)
        );
    }
}
