//! Collection lifecycle.

use log::{info, warn};

use crate::error::{RagStoreError, Result};
use crate::vector::backend::{CollectionInfo, CollectionStats};
use crate::vector::core::distance::Metric;
use crate::vector::engine::{VectorStore, engine_error};
use crate::vector::index::IndexSpec;
use crate::vector::schema::CollectionSchema;

const DEFAULT_COLLECTION_DESCRIPTION: &str = "RAG document chunks";

impl VectorStore {
    /// Create a collection with the standard chunk layout.
    ///
    /// Succeeds without changes when the collection already exists, even if
    /// its dimension or metric differ; the difference is logged and
    /// [`VectorStore::describe_collection`] shows the stored schema.
    pub fn create_collection(
        &self,
        name: &str,
        dimension: i64,
        metric: Metric,
        description: &str,
    ) -> Result<bool> {
        let schema = self
            .config
            .collection_schema(name, dimension, metric, description)?;
        self.create_collection_with_schema(&schema)
    }

    /// Create a collection from a caller-built schema. Same semantics as
    /// [`VectorStore::create_collection`].
    pub fn create_collection_with_schema(&self, schema: &CollectionSchema) -> Result<bool> {
        schema.validate()?;
        let backend = self.backend()?;

        if backend.has_collection(&schema.name).map_err(engine_error)? {
            self.report_existing(schema)?;
            return Ok(true);
        }

        if let Err(err) = backend.create_collection(schema) {
            // Lost a race with a concurrent create of the same name.
            if backend.has_collection(&schema.name).unwrap_or(false) {
                self.report_existing(schema)?;
                return Ok(true);
            }
            return Err(engine_error(err));
        }
        info!(
            "collection {} created (dimension {}, metric {})",
            schema.name, schema.dimension, schema.metric
        );
        Ok(true)
    }

    fn report_existing(&self, requested: &CollectionSchema) -> Result<()> {
        let existing = self.describe_collection(&requested.name)?.schema;
        if existing.dimension != requested.dimension || existing.metric != requested.metric {
            warn!(
                "collection {} already exists with dimension {} and metric {}; requested {} and {} ignored",
                requested.name,
                existing.dimension,
                existing.metric,
                requested.dimension,
                requested.metric
            );
        } else {
            info!("collection {} already exists", requested.name);
        }
        Ok(())
    }

    /// Make a collection searchable. Loading twice is fine.
    pub fn load_collection(&self, name: &str) -> Result<bool> {
        self.backend()?.load_collection(name).map_err(engine_error)?;
        info!("collection {name} loaded");
        Ok(true)
    }

    pub fn release_collection(&self, name: &str) -> Result<bool> {
        self.backend()?
            .release_collection(name)
            .map_err(engine_error)?;
        info!("collection {name} released");
        Ok(true)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.backend()?.drop_collection(name).map_err(engine_error)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.backend()?.has_collection(name).map_err(engine_error)
    }

    pub fn describe_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.backend()?
            .describe_collection(name)
            .map_err(engine_error)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.backend()?.list_collections().map_err(engine_error)
    }

    pub fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.backend()?
            .collection_stats(name)
            .map_err(engine_error)
    }

    /// Create the configured default collection, build the configured index
    /// if it has none, and load it. Returns false when the index build
    /// failed.
    pub fn ensure_default_collection(&self) -> Result<bool> {
        let defaults = &self.config.collection;
        let dimension = i64::try_from(defaults.dimension)
            .map_err(|_| RagStoreError::invalid_config("collection.dimension is too large"))?;
        self.create_collection(
            &defaults.name,
            dimension,
            defaults.metric,
            DEFAULT_COLLECTION_DESCRIPTION,
        )?;

        let info = self.describe_collection(&defaults.name)?;
        if info.index.is_none() {
            let spec = IndexSpec::new(self.config.index.algorithm.name(), info.schema.metric);
            if !self.create_index(&defaults.name, &spec)? {
                return Ok(false);
            }
        }
        self.load_collection(&defaults.name)
    }
}
