//! Vector storage and similarity search.
//!
//! # Module Structure
//!
//! - `core`: vector value type and distance metrics
//! - `schema`, `record`, `metadata`: the collection data model
//! - `filter`: scalar filter expressions
//! - `index`: Flat, HNSW and IVF_FLAT indexes
//! - `backend`: the backend seam and the embedded backend
//! - `session`: the shared client session
//! - `engine`: the high-level [`VectorStore`] operations

pub mod core;
pub mod index;

pub mod backend;
pub mod engine;
pub mod filter;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod session;

pub use self::core::distance::Metric;
pub use self::core::vector::Vector;
pub use self::engine::VectorStore;
