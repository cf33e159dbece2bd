//! Store configuration.
//!
//! [`StoreConfig`] is a plain serde structure. Every field has a default, so a
//! JSON file only needs to name the values it changes:
//!
//! ```
//! use ragstore::config::StoreConfig;
//!
//! let config = StoreConfig::from_json(r#"{"collection": {"dimension": 384}}"#).unwrap();
//! assert_eq!(config.collection.dimension, 384);
//! assert_eq!(config.collection.name, "rag_chunks");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};
use crate::storage::StorageConfig;
use crate::vector::core::distance::Metric;
use crate::vector::index::{IndexAlgorithm, IndexDefaults};
use crate::vector::schema::{
    self, CollectionSchema, DEFAULT_CONTENT_MAX_LENGTH, DEFAULT_DOC_ID_MAX_LENGTH,
    DEFAULT_ID_MAX_LENGTH, DEFAULT_METADATA_MAX_LENGTH, DEFAULT_SHARDS_NUM,
};

pub const DEFAULT_COLLECTION_NAME: &str = "rag_chunks";
pub const DEFAULT_DIMENSION: usize = 1536;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 10;
pub const MIN_SEARCH_EF: usize = 64;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 55_000;
pub const DEFAULT_SEED: u64 = 42;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub collection: CollectionConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub connection: ConnectionConfig,
    pub storage: StoreStorageConfig,
    /// Seed for index construction.
    pub seed: u64,
}

/// Default collection layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub shards_num: usize,
    pub id_max_length: usize,
    pub content_max_length: usize,
    pub doc_id_max_length: usize,
    pub metadata_max_length: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            name: DEFAULT_COLLECTION_NAME.to_string(),
            dimension: DEFAULT_DIMENSION,
            metric: Metric::Cosine,
            shards_num: DEFAULT_SHARDS_NUM,
            id_max_length: DEFAULT_ID_MAX_LENGTH,
            content_max_length: DEFAULT_CONTENT_MAX_LENGTH,
            doc_id_max_length: DEFAULT_DOC_ID_MAX_LENGTH,
            metadata_max_length: DEFAULT_METADATA_MAX_LENGTH,
        }
    }
}

/// Index defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Algorithm built by `ensure_default_collection`.
    pub algorithm: IndexAlgorithm,
    #[serde(flatten)]
    pub defaults: IndexDefaults,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            algorithm: IndexAlgorithm::Hnsw,
            defaults: IndexDefaults::default(),
        }
    }
}

/// Search defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub candidate_multiplier: usize,
    /// Lower bound of the search breadth.
    pub min_ef: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            top_k: DEFAULT_TOP_K,
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            min_ef: MIN_SEARCH_EF,
        }
    }
}

/// Session settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub keep_alive_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            token: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("keep_alive_ms", &self.keep_alive_ms)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the embedded backend keeps its snapshots. No directory means the
/// store lives in memory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreStorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub io: StorageConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            collection: CollectionConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            connection: ConnectionConfig::default(),
            storage: StoreStorageConfig::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)
            .map_err(|e| RagStoreError::invalid_config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RagStoreError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.storage.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_default_collection<S: Into<String>>(mut self, name: S) -> Self {
        self.collection.name = name.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.collection.dimension = dimension;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: usize| -> Result<()> {
            if value == 0 {
                return Err(RagStoreError::invalid_config(format!(
                    "{name} must be positive"
                )));
            }
            Ok(())
        };

        schema::validate_collection_name(&self.collection.name)
            .map_err(|e| RagStoreError::invalid_config(e.to_string()))?;
        positive("collection.dimension", self.collection.dimension)?;
        positive("collection.shards_num", self.collection.shards_num)?;
        positive("index.hnsw_m", self.index.defaults.hnsw_m)?;
        positive(
            "index.hnsw_ef_construction",
            self.index.defaults.hnsw_ef_construction,
        )?;
        positive("index.ivf_nlist", self.index.defaults.ivf_nlist)?;
        positive("index.ivf_nprobe", self.index.defaults.ivf_nprobe)?;
        positive("search.min_ef", self.search.min_ef)?;
        if !(1..=100).contains(&self.search.top_k) {
            return Err(RagStoreError::invalid_config(
                "search.top_k must be within [1, 100]",
            ));
        }
        if !(1..=100).contains(&self.search.candidate_multiplier) {
            return Err(RagStoreError::invalid_config(
                "search.candidate_multiplier must be within [1, 100]",
            ));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(RagStoreError::invalid_config(
                "connection.connect_timeout_ms must be positive",
            ));
        }
        if self.connection.token.as_deref().is_some_and(str::is_empty) {
            return Err(RagStoreError::invalid_config(
                "connection.token must not be empty when set",
            ));
        }
        Ok(())
    }

    /// Schema of a collection using the configured layout.
    pub fn collection_schema(
        &self,
        name: &str,
        dimension: i64,
        metric: Metric,
        description: &str,
    ) -> Result<CollectionSchema> {
        CollectionSchema::builder(name, dimension)
            .description(description)
            .metric(metric)
            .shards_num(self.collection.shards_num)
            .id_max_length(self.collection.id_max_length)
            .content_max_length(self.collection.content_max_length)
            .doc_id_max_length(self.collection.doc_id_max_length)
            .metadata_max_length(self.collection.metadata_max_length)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.collection.name, "rag_chunks");
        assert_eq!(config.collection.dimension, 1536);
        assert_eq!(config.collection.metric, Metric::Cosine);
        assert_eq!(config.collection.shards_num, 2);
        assert_eq!(config.index.algorithm, IndexAlgorithm::Hnsw);
        assert_eq!(config.index.defaults.hnsw_m, 16);
        assert_eq!(config.index.defaults.ivf_nlist, 4096);
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.connection.keep_alive(), Duration::from_secs(55));
        assert!(config.storage.data_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StoreConfig::from_json(
            r#"{
                "collection": {"name": "chunks", "metric": "l2"},
                "index": {"algorithm": "IVF_FLAT", "ivf_nlist": 128},
                "storage": {"data_dir": "/tmp/rag", "sync_writes": false}
            }"#,
        )
        .unwrap();
        assert_eq!(config.collection.name, "chunks");
        assert_eq!(config.collection.metric, Metric::L2);
        assert_eq!(config.collection.dimension, 1536);
        assert_eq!(config.index.algorithm, IndexAlgorithm::IvfFlat);
        assert_eq!(config.index.defaults.ivf_nlist, 128);
        assert_eq!(config.index.defaults.hnsw_m, 16);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/rag")));
        assert!(!config.storage.io.sync_writes);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for json in [
            r#"{"collection": {"dimension": 0}}"#,
            r#"{"collection": {"name": "bad name"}}"#,
            r#"{"search": {"top_k": 101}}"#,
            r#"{"connection": {"token": ""}}"#,
            r#"{"collection": "oops"}"#,
        ] {
            assert!(
                matches!(StoreConfig::from_json(json), Err(RagStoreError::Config(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn test_token_is_redacted() {
        let mut config = ConnectionConfig::default();
        config.token = Some("secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_collection_schema_uses_layout() {
        let mut config = StoreConfig::default();
        config.collection.shards_num = 4;
        let schema = config
            .collection_schema("docs", 8, Metric::L2, "test")
            .unwrap();
        assert_eq!(schema.shards_num, 4);
        assert_eq!(schema.dimension, 8);
        assert_eq!(schema.metric, Metric::L2);
    }
}
