//! # ragstore
//!
//! A vector store engine for retrieval-augmented generation.
//!
//! ## Features
//!
//! - Collections with a fixed chunk layout (id, embedding, content, doc id, metadata)
//! - Flat, HNSW and IVF_FLAT indexes over cosine, L2 and inner product
//! - Batch inserts that are visible to every search once they return
//! - Filtered similarity search with a small boolean filter language
//! - Snapshot persistence through pluggable storage
//!
//! ## Example
//!
//! ```
//! use ragstore::{IndexSpec, Metric, SearchRequest, StoreConfig, VectorRecord, VectorStore};
//!
//! # fn main() -> ragstore::Result<()> {
//! let store = VectorStore::open(StoreConfig::default())?;
//! store.create_collection("docs", 3, Metric::Cosine, "document chunks")?;
//! store.create_index("docs", &IndexSpec::hnsw(Metric::Cosine))?;
//! store.load_collection("docs")?;
//!
//! store.batch_insert(
//!     "docs",
//!     vec![
//!         VectorRecord::new("a", vec![1.0, 0.0, 0.0]).with_doc_id("d1"),
//!         VectorRecord::new("b", vec![0.0, 1.0, 0.0]).with_doc_id("d2"),
//!     ],
//! )?;
//!
//! let request = SearchRequest::new(vec![1.0, 0.0, 0.0])
//!     .with_top_k(1)
//!     .with_filter("doc_id == 'd1'");
//! let response = store.search("docs", &request)?;
//! assert_eq!(response.results[0].id, "a");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod storage;
pub mod vector;

pub use config::StoreConfig;
pub use error::{RagStoreError, Result};
pub use vector::Metric;
pub use vector::engine::{InsertResult, SearchRequest, SearchResponse, SearchResult, VectorStore};
pub use vector::filter::FilterExpr;
pub use vector::index::{IndexParams, IndexSpec};
pub use vector::metadata::{Metadata, MetadataValue};
pub use vector::record::VectorRecord;
pub use vector::session::Session;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
