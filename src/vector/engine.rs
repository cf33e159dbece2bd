//! The vector store engine.
//!
//! [`VectorStore`] is the operation surface used by ingestion and query
//! services. It validates every request against the collection schema before
//! touching the backend, and reports backend runtime failures as
//! `EngineUnavailable`. Operations are grouped by concern:
//!
//! - [`collection`]: create, load, release, drop and inspect collections
//! - [`index`]: build and drop the vector index
//! - [`mutation`]: batch insert with flush, deletes
//! - [`search`]: filtered similarity search
//! - [`tracked`]: async handles for the blocking operations
//!
//! # Example
//!
//! ```
//! use ragstore::{Metric, SearchRequest, StoreConfig, VectorRecord, VectorStore};
//!
//! # fn main() -> ragstore::Result<()> {
//! let store = VectorStore::open(StoreConfig::default())?;
//! store.create_collection("docs", 3, Metric::Cosine, "chunks")?;
//! store.load_collection("docs")?;
//! store.batch_insert(
//!     "docs",
//!     vec![VectorRecord::new("a", vec![1.0, 0.0, 0.0]).with_doc_id("d1")],
//! )?;
//!
//! let response = store.search("docs", &SearchRequest::new(vec![1.0, 0.0, 0.0]).with_top_k(1))?;
//! assert_eq!(response.results[0].id, "a");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::info;

use crate::config::StoreConfig;
use crate::error::{RagStoreError, Result};
use crate::storage::Storage;
use crate::storage::file::FileStorage;
use crate::storage::memory::MemoryStorage;
use crate::vector::backend::{EmbeddedBackend, VectorBackend};
use crate::vector::session::Session;

pub mod assembler;
pub mod collection;
pub mod index;
pub mod mutation;
pub mod request;
pub mod response;
pub mod search;
pub mod tracked;

pub use assembler::ResultAssembler;
pub use request::SearchRequest;
pub use response::{InsertResult, SearchResponse, SearchResult};
pub use tracked::TrackedOperation;

/// Engine over a shared [`Session`]. Cloning is cheap and clones share the
/// session.
#[derive(Debug, Clone)]
pub struct VectorStore {
    session: Arc<Session>,
    config: Arc<StoreConfig>,
}

impl VectorStore {
    /// Build an engine over an existing session.
    pub fn new(session: Arc<Session>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(VectorStore {
            session,
            config: Arc::new(config),
        })
    }

    /// Open an embedded backend as configured and a session over it.
    /// Snapshots go under `storage.data_dir` when set; otherwise the store
    /// is memory-only.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn Storage> = match &config.storage.data_dir {
            Some(dir) => {
                info!("opening store at {}", dir.display());
                Arc::new(FileStorage::new(dir, config.storage.io.clone())?)
            }
            None => Arc::new(MemoryStorage::new(config.storage.io.clone())),
        };
        let backend: Arc<dyn VectorBackend> = Arc::new(EmbeddedBackend::open(storage, config.seed)?);
        let session = Session::open(&config.connection, backend)?;
        Self::new(session, config)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shut down the session. Every later call fails with
    /// `EngineUnavailable`.
    pub fn shutdown(&self) -> Result<()> {
        self.session.shutdown()
    }

    /// The session's backend, re-pinged first once the keep-alive interval
    /// has elapsed.
    fn backend(&self) -> Result<&dyn VectorBackend> {
        self.session.keep_alive()?;
        self.session.backend()
    }
}

/// Keep typed failures, report everything else as `EngineUnavailable`.
fn engine_error(err: RagStoreError) -> RagStoreError {
    err.into_engine_error()
}
