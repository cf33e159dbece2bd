//! The seam between the engine and the similarity-search backend.
//!
//! [`VectorBackend`] lists what the engine needs from a vector database:
//! collection lifecycle, index builds, staged inserts with an explicit flush,
//! predicate deletes and filtered ANN queries. The engine validates requests
//! before calling into a backend and maps backend runtime failures to
//! `EngineUnavailable`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vector::core::vector::Vector;
use crate::vector::filter::FilterExpr;
use crate::vector::index::IndexDescription;
use crate::vector::schema::CollectionSchema;

pub mod embedded;

pub use embedded::EmbeddedBackend;

/// A row as handed to the backend, with every field materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: String,
    pub vector: Vector,
    pub content: String,
    pub doc_id: String,
    /// Encoded metadata blob.
    pub metadata: String,
    /// `None` keeps the creation time of the row being replaced, if any.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Collection state reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub schema: CollectionSchema,
    pub loaded: bool,
    pub index: Option<IndexDescription>,
    pub created_at: DateTime<Utc>,
}

/// Row counts of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    /// Rows visible to searches.
    pub row_count: usize,
    /// Rows inserted but not yet flushed.
    pub pending_row_count: usize,
    pub index: Option<IndexDescription>,
}

/// A resolved ANN query.
#[derive(Debug, Clone)]
pub struct AnnQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    /// Search breadth for algorithms that have one.
    pub ef: usize,
    pub filter: Option<FilterExpr>,
    /// Scalar fields to return with each hit.
    pub output_fields: Vec<String>,
    /// Return the stored vector under the vector field name.
    pub include_vector: bool,
}

/// A stored field value returned with a hit.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Text(String),
    Vector(Vec<f32>),
}

/// One raw search hit, best first within a result list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub score: f32,
    pub fields: HashMap<String, StoredValue>,
}

/// Operations the engine requires from a similarity-search backend.
///
/// Implementations must be safe to share between threads; every method
/// takes `&self`.
pub trait VectorBackend: Send + Sync + std::fmt::Debug {
    /// Check connectivity.
    fn ping(&self) -> Result<()>;

    fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if one with the same name exists.
    fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    fn describe_collection(&self, name: &str) -> Result<CollectionInfo>;

    fn list_collections(&self) -> Result<Vec<String>>;

    /// Remove a collection with its data, index and persisted state.
    fn drop_collection(&self, name: &str) -> Result<()>;

    /// Make a collection servable for search.
    fn load_collection(&self, name: &str) -> Result<()>;

    fn release_collection(&self, name: &str) -> Result<()>;

    /// Build (or rebuild) the index on the vector field. Blocks until done.
    fn create_index(&self, name: &str, index: &IndexDescription) -> Result<()>;

    /// Drop the index on `field`. Returns whether one existed.
    fn drop_index(&self, name: &str, field: &str) -> Result<bool>;

    /// Stage rows for insertion and return a mutation token. Staged rows
    /// become visible after [`VectorBackend::flush`].
    fn insert(&self, name: &str, rows: Vec<StoredRow>) -> Result<u64>;

    /// Make every staged row visible and durable. A failed flush publishes
    /// nothing; the staged rows stay pending.
    fn flush(&self, name: &str) -> Result<()>;

    /// Drop the still-staged rows of the insert that returned `token`.
    /// Returns the number of rows dropped.
    fn discard(&self, name: &str, token: u64) -> Result<usize>;

    /// Delete every row matching `filter`. Returns the number removed.
    fn delete(&self, name: &str, filter: &FilterExpr) -> Result<usize>;

    fn search(&self, name: &str, query: &AnnQuery) -> Result<Vec<RawHit>>;

    fn collection_stats(&self, name: &str) -> Result<CollectionStats>;

    /// Release backend resources. Later calls fail.
    fn close(&self) -> Result<()>;
}
