//! Error types for the ragstore library.
//!
//! All errors are represented by the [`RagStoreError`] enum. The first group of
//! variants is the engine's public taxonomy (schema, index, mutation and search
//! failures); the remaining variants cover I/O, serialization and other
//! ambient failures.
//!
//! # Examples
//!
//! ```
//! use ragstore::error::{RagStoreError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(RagStoreError::validation("topK must be within [1, 100]"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for ragstore operations.
#[derive(Error, Debug)]
pub enum RagStoreError {
    /// Collection schema is invalid (non-positive dimension, bad name, ...).
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Collection, field or index does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request does not fit the collection schema (wrong field, incompatible metric).
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Unknown index algorithm name.
    #[error("Unsupported index algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Record vector length differs from the collection dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Request parameters are out of range or malformed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Search issued against a collection that was never loaded.
    #[error("Collection not loaded: {0}")]
    CollectionNotLoaded(String),

    /// The backing store is unreachable or failed while serving the call.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A stored metadata blob could not be decoded.
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Thread join errors
    #[error("Thread join error: {0}")]
    ThreadJoin(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with RagStoreError.
pub type Result<T> = std::result::Result<T, RagStoreError>;

impl RagStoreError {
    /// Create a new invalid schema error.
    pub fn invalid_schema<S: Into<String>>(msg: S) -> Self {
        RagStoreError::InvalidSchema(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        RagStoreError::NotFound(msg.into())
    }

    /// Create a new schema mismatch error.
    pub fn schema_mismatch<S: Into<String>>(msg: S) -> Self {
        RagStoreError::SchemaMismatch(msg.into())
    }

    /// Create a new unsupported algorithm error.
    pub fn unsupported_algorithm<S: Into<String>>(name: S) -> Self {
        RagStoreError::UnsupportedAlgorithm(name.into())
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        RagStoreError::DimensionMismatch { expected, actual }
    }

    /// Create a new validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        RagStoreError::ValidationError(msg.into())
    }

    /// Create a new collection-not-loaded error.
    pub fn not_loaded<S: Into<String>>(collection: S) -> Self {
        RagStoreError::CollectionNotLoaded(collection.into())
    }

    /// Create a new engine unavailable error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        RagStoreError::EngineUnavailable(msg.into())
    }

    /// Create a new malformed metadata error.
    pub fn malformed_metadata<S: Into<String>>(msg: S) -> Self {
        RagStoreError::MalformedMetadata(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        RagStoreError::Storage(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        RagStoreError::Config(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        RagStoreError::Other(msg.into())
    }

    /// Whether this error belongs to the engine's typed taxonomy and should
    /// reach the caller unchanged.
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            RagStoreError::InvalidSchema(_)
                | RagStoreError::NotFound(_)
                | RagStoreError::SchemaMismatch(_)
                | RagStoreError::UnsupportedAlgorithm(_)
                | RagStoreError::DimensionMismatch { .. }
                | RagStoreError::ValidationError(_)
                | RagStoreError::CollectionNotLoaded(_)
                | RagStoreError::EngineUnavailable(_)
                | RagStoreError::MalformedMetadata(_)
        )
    }

    /// Collapse backend runtime failures into `EngineUnavailable`, keeping
    /// typed errors as they are.
    pub fn into_engine_error(self) -> Self {
        if self.is_domain_error() {
            self
        } else {
            RagStoreError::EngineUnavailable(self.to_string())
        }
    }
}
