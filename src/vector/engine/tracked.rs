//! Async completion handles for the blocking operations.
//!
//! `create_index` and the flush inside `batch_insert` block until the backend
//! is done. The `spawn_*` variants run them on tokio's blocking pool and hand
//! back a [`TrackedOperation`] the caller can poll or await. The side effect
//! (index queryable, data visible) holds once the operation has finished.

use std::fmt;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{RagStoreError, Result};
use crate::vector::engine::VectorStore;
use crate::vector::engine::response::InsertResult;
use crate::vector::index::IndexSpec;
use crate::vector::record::VectorRecord;

/// A running engine operation.
pub struct TrackedOperation<T> {
    id: Uuid,
    kind: &'static str,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> TrackedOperation<T> {
    fn spawn<F>(kind: &'static str, operation: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            RagStoreError::other(format!("tracked operations need a tokio runtime: {e}"))
        })?;
        Ok(TrackedOperation {
            id: Uuid::new_v4(),
            kind,
            handle: runtime.spawn_blocking(operation),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation and return its result.
    pub async fn wait(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(RagStoreError::ThreadJoin(format!(
                "{} operation {} did not complete: {e}",
                self.kind, self.id
            ))),
        }
    }
}

impl<T> fmt::Debug for TrackedOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl VectorStore {
    /// [`VectorStore::create_index`] on the blocking pool.
    pub fn spawn_create_index(
        &self,
        collection: &str,
        spec: IndexSpec,
    ) -> Result<TrackedOperation<bool>> {
        let store = self.clone();
        let collection = collection.to_string();
        TrackedOperation::spawn("create_index", move || {
            store.create_index(&collection, &spec)
        })
    }

    /// [`VectorStore::batch_insert`] on the blocking pool.
    pub fn spawn_batch_insert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<TrackedOperation<InsertResult>> {
        let store = self.clone();
        let collection = collection.to_string();
        TrackedOperation::spawn("batch_insert", move || {
            store.batch_insert(&collection, records)
        })
    }
}
