//! In-process backend.
//!
//! Each collection keeps two segments: staged rows written by `insert`, and
//! visible rows that searches read. `flush` moves staged rows into the visible
//! segment, updates the index and writes a snapshot of the collection through
//! the configured [`Storage`]. Opening a backend over existing storage restores
//! every snapshot and rebuilds its index; restored collections start released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::error::{RagStoreError, Result};
use crate::storage::memory::MemoryStorage;
use crate::storage::{self, Storage};
use crate::vector::backend::{
    AnnQuery, CollectionInfo, CollectionStats, RawHit, StoredRow, StoredValue, VectorBackend,
};
use crate::vector::core::distance::Metric;
use crate::vector::filter::{FilterExpr, FilterTarget};
use crate::vector::index::flat::exact_scan;
use crate::vector::index::{AnnIndex, IndexDescription, Neighbor, RowId, new_index};
use crate::vector::metadata::{self, Metadata};
use crate::vector::schema::{
    CONTENT_FIELD, CollectionSchema, DOC_ID_FIELD, ID_FIELD, METADATA_FIELD, VECTOR_FIELD,
};

pub mod snapshot;

use snapshot::{CollectionSnapshot, SnapshotRow};

/// Seed used for index construction when none is configured.
pub const DEFAULT_INDEX_SEED: u64 = 42;

#[derive(Debug)]
struct Row {
    stored: StoredRow,
    /// Decoded once; `None` when the blob is malformed.
    metadata: Option<Metadata>,
}

impl Row {
    fn new(stored: StoredRow) -> Self {
        let metadata = metadata::decode(&stored.metadata).ok();
        Row { stored, metadata }
    }

    fn vector(&self) -> &[f32] {
        self.stored.vector.as_slice()
    }
}

impl FilterTarget for Row {
    fn id(&self) -> &str {
        &self.stored.id
    }

    fn doc_id(&self) -> &str {
        &self.stored.doc_id
    }

    fn content(&self) -> &str {
        &self.stored.content
    }

    fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }
}

/// A row waiting for flush, tagged with the mutation that staged it.
#[derive(Debug)]
struct StagedRow {
    token: u64,
    row_id: RowId,
    row: Row,
}

#[derive(Debug)]
struct CollectionState {
    schema: CollectionSchema,
    created_at: DateTime<Utc>,
    loaded: bool,
    index_description: Option<IndexDescription>,
    index: Option<Box<dyn AnnIndex>>,
    rows: BTreeMap<RowId, Row>,
    row_by_id: AHashMap<String, RowId>,
    staged: Vec<StagedRow>,
    next_row_id: RowId,
    /// Set under the write lock when the collection is dropped. Handles
    /// obtained before the drop must not write through.
    dropped: bool,
}

impl CollectionState {
    fn new(schema: CollectionSchema) -> Self {
        CollectionState {
            schema,
            created_at: Utc::now(),
            loaded: false,
            index_description: None,
            index: None,
            rows: BTreeMap::new(),
            row_by_id: AHashMap::new(),
            staged: Vec::new(),
            next_row_id: 0,
            dropped: false,
        }
    }

    fn from_snapshot(snapshot: CollectionSnapshot, seed: u64) -> Result<Self> {
        let mut state = CollectionState::new(snapshot.schema);
        state.created_at = snapshot.created_at;
        state.next_row_id = snapshot.next_row_id;
        for SnapshotRow { row_id, row } in snapshot.rows {
            state.row_by_id.insert(row.id.clone(), row_id);
            state.rows.insert(row_id, Row::new(row));
        }
        if let Some(description) = snapshot.index {
            state.index = Some(state.build_index(&description, seed)?);
            state.index_description = Some(description);
        }
        Ok(state)
    }

    fn to_snapshot(&self) -> CollectionSnapshot {
        self.snapshot_with(self.index_description.as_ref(), &AHashSet::new(), &[])
    }

    /// Snapshot of the state a pending change would produce: `removed` rows
    /// left out, `additions` appended and `index` as the index description.
    fn snapshot_with(
        &self,
        index: Option<&IndexDescription>,
        removed: &AHashSet<RowId>,
        additions: &[(RowId, StoredRow)],
    ) -> CollectionSnapshot {
        let mut rows: Vec<SnapshotRow> = self
            .rows
            .iter()
            .filter(|(row_id, _)| !removed.contains(*row_id))
            .map(|(row_id, row)| SnapshotRow {
                row_id: *row_id,
                row: row.stored.clone(),
            })
            .collect();
        rows.extend(additions.iter().map(|(row_id, row)| SnapshotRow {
            row_id: *row_id,
            row: row.clone(),
        }));
        CollectionSnapshot {
            schema: self.schema.clone(),
            created_at: self.created_at,
            index: index.cloned(),
            next_row_id: self.next_row_id,
            rows,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped {
            return Err(RagStoreError::not_found(format!(
                "collection '{}'",
                self.schema.name
            )));
        }
        Ok(())
    }

    fn info(&self) -> CollectionInfo {
        CollectionInfo {
            schema: self.schema.clone(),
            loaded: self.loaded,
            index: self.index_description.clone(),
            created_at: self.created_at,
        }
    }

    /// Metric results are scored with: the index's when one exists.
    fn metric(&self) -> Metric {
        self.index_description
            .as_ref()
            .map_or(self.schema.metric, |d| d.metric)
    }

    fn build_index(&self, description: &IndexDescription, seed: u64) -> Result<Box<dyn AnnIndex>> {
        let mut index = new_index(
            &description.params,
            description.metric,
            self.schema.dimension,
            seed,
        );
        let mut rows: Vec<(RowId, Vec<f32>)> = self
            .rows
            .iter()
            .map(|(row_id, row)| (*row_id, row.vector().to_vec()))
            .collect();
        index.insert_batch(&mut rows)?;
        Ok(index)
    }

    fn stage(&mut self, rows: Vec<StoredRow>, token: u64) {
        for stored in rows {
            let row_id = self.next_row_id;
            self.next_row_id += 1;
            self.staged.push(StagedRow {
                token,
                row_id,
                row: Row::new(stored),
            });
        }
    }

    /// Drop the staged rows of one mutation.
    fn discard(&mut self, token: u64) -> usize {
        let before = self.staged.len();
        self.staged.retain(|staged| staged.token != token);
        before - self.staged.len()
    }

    /// The rows a flush would publish, with creation times resolved. Later
    /// writes of the same id win.
    fn resolve_staged(&self) -> Vec<(RowId, StoredRow)> {
        let mut survivors: Vec<(RowId, StoredRow)> = Vec::with_capacity(self.staged.len());
        let mut position: AHashMap<&str, usize> = AHashMap::new();
        for staged in &self.staged {
            let mut row = staged.row.stored.clone();
            match position.get(staged.row.stored.id.as_str()) {
                Some(&i) => {
                    if row.created_at.is_none() {
                        row.created_at = survivors[i].1.created_at;
                    }
                    survivors[i] = (staged.row_id, row);
                }
                None => {
                    position.insert(staged.row.stored.id.as_str(), survivors.len());
                    survivors.push((staged.row_id, row));
                }
            }
        }

        for (_, row) in &mut survivors {
            if row.created_at.is_none() {
                let replaced = self
                    .row_by_id
                    .get(&row.id)
                    .and_then(|old| self.rows.get(old))
                    .and_then(|old| old.stored.created_at);
                row.created_at = Some(replaced.unwrap_or(row.updated_at));
            }
        }
        survivors
    }

    /// Row ids that `survivors` replace.
    fn replaced_by(&self, survivors: &[(RowId, StoredRow)]) -> AHashSet<RowId> {
        survivors
            .iter()
            .filter_map(|(_, row)| self.row_by_id.get(&row.id).copied())
            .collect()
    }

    /// Publish resolved rows and clear the staging segment.
    fn commit_staged(&mut self, survivors: Vec<(RowId, StoredRow)>) -> Result<usize> {
        self.staged.clear();
        let mut additions = Vec::with_capacity(survivors.len());
        for (row_id, stored) in survivors {
            if let Some(old_row_id) = self.row_by_id.remove(&stored.id) {
                self.rows.remove(&old_row_id);
                if let Some(index) = self.index.as_mut() {
                    index.remove(old_row_id);
                }
            }
            additions.push((row_id, stored.vector.data.clone()));
            self.row_by_id.insert(stored.id.clone(), row_id);
            self.rows.insert(row_id, Row::new(stored));
        }

        let applied = additions.len();
        if let Some(index) = self.index.as_mut() {
            index.insert_batch(&mut additions)?;
        }
        Ok(applied)
    }

    fn matching_rows(&self, filter: &FilterExpr) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|(_, row)| filter.matches(*row))
            .map(|(row_id, _)| *row_id)
            .collect()
    }

    fn remove_rows(&mut self, row_ids: &[RowId]) {
        for row_id in row_ids {
            if let Some(row) = self.rows.remove(row_id) {
                self.row_by_id.remove(&row.stored.id);
                if let Some(index) = self.index.as_mut() {
                    index.remove(*row_id);
                }
            }
        }
    }

    fn discard_matching(&mut self, filter: &FilterExpr) -> usize {
        let before = self.staged.len();
        self.staged.retain(|staged| !filter.matches(&staged.row));
        before - self.staged.len()
    }

    fn search(&self, query: &AnnQuery) -> Result<Vec<RawHit>> {
        if query.vector.len() != self.schema.dimension {
            return Err(RagStoreError::dimension_mismatch(
                self.schema.dimension,
                query.vector.len(),
            ));
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let metric = self.metric();
        let eligible = |row: &Row| query.filter.as_ref().is_none_or(|f| f.matches(row));

        let mut neighbors: Vec<Neighbor> = match &self.index {
            Some(index) => {
                let breadth = query.ef.max(query.top_k);
                index
                    .search(&query.vector, breadth, breadth)
                    .into_iter()
                    .filter(|n| self.rows.get(&n.row_id).is_some_and(&eligible))
                    .take(query.top_k)
                    .collect()
            }
            None => Vec::new(),
        };

        // The approximate pass can come up short under selective filters.
        if neighbors.len() < query.top_k {
            let candidates: Vec<(RowId, &[f32])> = self
                .rows
                .iter()
                .filter(|(_, row)| eligible(*row))
                .map(|(row_id, row)| (*row_id, row.vector()))
                .collect();
            if neighbors.len() < candidates.len().min(query.top_k) {
                if self.index.is_some() {
                    debug!(
                        "collection {}: index returned {} of {} eligible rows, scanning",
                        self.schema.name,
                        neighbors.len(),
                        candidates.len()
                    );
                }
                neighbors = exact_scan(metric, &query.vector, candidates, query.top_k);
            }
        }

        neighbors.sort_by(Neighbor::cmp_by_distance);
        neighbors.truncate(query.top_k);

        Ok(neighbors
            .iter()
            .filter_map(|n| {
                self.rows
                    .get(&n.row_id)
                    .map(|row| raw_hit(row, metric.score(n.distance), query))
            })
            .collect())
    }

    fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.schema.name.clone(),
            row_count: self.rows.len(),
            pending_row_count: self.staged.len(),
            index: self.index_description.clone(),
        }
    }
}

fn raw_hit(row: &Row, score: f32, query: &AnnQuery) -> RawHit {
    let mut fields = HashMap::with_capacity(query.output_fields.len() + 1);
    for name in &query.output_fields {
        let value = match name.as_str() {
            ID_FIELD => &row.stored.id,
            CONTENT_FIELD => &row.stored.content,
            DOC_ID_FIELD => &row.stored.doc_id,
            METADATA_FIELD => &row.stored.metadata,
            _ => continue,
        };
        fields.insert(name.clone(), StoredValue::Text(value.clone()));
    }
    if query.include_vector {
        fields.insert(
            VECTOR_FIELD.to_string(),
            StoredValue::Vector(row.stored.vector.data.clone()),
        );
    }
    RawHit {
        id: row.stored.id.clone(),
        score,
        fields,
    }
}

type CollectionHandle = Arc<RwLock<CollectionState>>;

/// A [`VectorBackend`] that runs inside the calling process.
///
/// The catalog lock is held only to look up or replace collection handles;
/// each collection has its own lock so operations on different collections
/// proceed in parallel.
#[derive(Debug)]
pub struct EmbeddedBackend {
    storage: Arc<dyn Storage>,
    collections: RwLock<BTreeMap<String, CollectionHandle>>,
    seed: u64,
    mutation_counter: AtomicU64,
    closed: AtomicBool,
}

impl EmbeddedBackend {
    /// Open a backend over `storage`, restoring every collection snapshot
    /// found there.
    pub fn open(storage: Arc<dyn Storage>, seed: u64) -> Result<Self> {
        let mut collections = BTreeMap::new();
        for file in storage.list()? {
            if storage::is_temporary(&file) {
                debug!("removing leftover temporary file {file}");
                storage.remove(&file)?;
                continue;
            }
            let Some(name) = snapshot::collection_name(&file) else {
                continue;
            };
            let bytes = storage.read(&file)?;
            let state = CollectionState::from_snapshot(snapshot::decode(&bytes)?, seed)?;
            info!(
                "restored collection {name} with {} rows",
                state.rows.len()
            );
            collections.insert(name.to_string(), Arc::new(RwLock::new(state)));
        }

        Ok(EmbeddedBackend {
            storage,
            collections: RwLock::new(collections),
            seed,
            mutation_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// A backend whose state lives only in memory.
    pub fn in_memory(seed: u64) -> Self {
        EmbeddedBackend {
            storage: Arc::new(MemoryStorage::new_default()),
            collections: RwLock::new(BTreeMap::new()),
            seed,
            mutation_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RagStoreError::unavailable("backend is closed"));
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Result<CollectionHandle> {
        self.ensure_open()?;
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RagStoreError::not_found(format!("collection '{name}'")))
    }

    /// Write `snapshot` as the durable state of `state`'s collection. Callers
    /// change the in-memory state only after this succeeds.
    fn persist(&self, state: &CollectionState, snapshot: &CollectionSnapshot) -> Result<()> {
        state.ensure_live()?;
        let bytes = snapshot::encode(snapshot)?;
        storage::write_atomic(
            self.storage.as_ref(),
            &snapshot::file_name(&state.schema.name),
            &bytes,
        )
    }
}

impl VectorBackend for EmbeddedBackend {
    fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.collections.read().contains_key(name))
    }

    fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.ensure_open()?;
        schema.validate()?;

        let mut collections = self.collections.write();
        if collections.contains_key(&schema.name) {
            return Err(RagStoreError::validation(format!(
                "collection '{}' already exists",
                schema.name
            )));
        }
        let state = CollectionState::new(schema.clone());
        self.persist(&state, &state.to_snapshot())?;
        collections.insert(schema.name.clone(), Arc::new(RwLock::new(state)));
        info!("created collection {}", schema.name);
        Ok(())
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionInfo> {
        Ok(self.collection(name)?.read().info())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        // The catalog stays locked until the snapshot is gone, so a collection
        // re-created under the same name cannot lose its snapshot to this drop.
        let mut collections = self.collections.write();
        let handle = collections
            .get(name)
            .cloned()
            .ok_or_else(|| RagStoreError::not_found(format!("collection '{name}'")))?;
        let mut state = handle.write();
        self.storage.remove(&snapshot::file_name(name))?;
        state.dropped = true;
        state.staged.clear();
        drop(state);
        collections.remove(name);
        info!("dropped collection {name}");
        Ok(())
    }

    fn load_collection(&self, name: &str) -> Result<()> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        state.loaded = true;
        Ok(())
    }

    fn release_collection(&self, name: &str) -> Result<()> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        state.loaded = false;
        Ok(())
    }

    fn create_index(&self, name: &str, description: &IndexDescription) -> Result<()> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        if description.field != VECTOR_FIELD {
            return Err(RagStoreError::schema_mismatch(format!(
                "field '{}' is not a vector field of '{name}'",
                description.field
            )));
        }

        let index = state.build_index(description, self.seed)?;
        info!(
            "built {} index on {name} over {} rows",
            description.algorithm(),
            index.len()
        );
        let snapshot = state.snapshot_with(Some(description), &AHashSet::new(), &[]);
        self.persist(&state, &snapshot)?;
        state.index = Some(index);
        state.index_description = Some(description.clone());
        Ok(())
    }

    fn drop_index(&self, name: &str, field: &str) -> Result<bool> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        let matches = state
            .index_description
            .as_ref()
            .is_some_and(|d| d.field == field);
        if !matches {
            return Ok(false);
        }
        let snapshot = state.snapshot_with(None, &AHashSet::new(), &[]);
        self.persist(&state, &snapshot)?;
        state.index = None;
        state.index_description = None;
        Ok(true)
    }

    fn insert(&self, name: &str, rows: Vec<StoredRow>) -> Result<u64> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        let dimension = state.schema.dimension;
        for row in &rows {
            row.vector.check_dimension(dimension)?;
        }
        let staged = rows.len();
        let token = self.mutation_counter.fetch_add(1, Ordering::Relaxed) + 1;
        state.stage(rows, token);
        debug!("staged {staged} rows in {name} (mutation {token})");
        Ok(token)
    }

    fn flush(&self, name: &str) -> Result<()> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        if state.staged.is_empty() {
            return Ok(());
        }
        let survivors = state.resolve_staged();
        let replaced = state.replaced_by(&survivors);
        let snapshot = state.snapshot_with(state.index_description.as_ref(), &replaced, &survivors);
        self.persist(&state, &snapshot)?;
        let applied = state.commit_staged(survivors)?;
        debug!("flushed {applied} rows into {name}");
        Ok(())
    }

    fn discard(&self, name: &str, token: u64) -> Result<usize> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        let discarded = state.discard(token);
        if discarded > 0 {
            debug!("discarded {discarded} staged rows of mutation {token} in {name}");
        }
        Ok(discarded)
    }

    fn delete(&self, name: &str, filter: &FilterExpr) -> Result<usize> {
        let handle = self.collection(name)?;
        let mut state = handle.write();
        state.ensure_live()?;
        let doomed = state.matching_rows(filter);
        if !doomed.is_empty() {
            let removed: AHashSet<RowId> = doomed.iter().copied().collect();
            let snapshot = state.snapshot_with(state.index_description.as_ref(), &removed, &[]);
            self.persist(&state, &snapshot)?;
            state.remove_rows(&doomed);
        }
        Ok(doomed.len() + state.discard_matching(filter))
    }

    fn search(&self, name: &str, query: &AnnQuery) -> Result<Vec<RawHit>> {
        let handle = self.collection(name)?;
        let state = handle.read();
        if !state.loaded {
            return Err(RagStoreError::not_loaded(name));
        }
        state.search(query)
    }

    fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        Ok(self.collection(name)?.read().stats())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let collections = std::mem::take(&mut *self.collections.write());
        for (name, handle) in &collections {
            let pending = handle.read().staged.len();
            if pending > 0 {
                warn!("closing with {pending} unflushed rows in {name}");
            }
        }
        self.storage.sync()?;
        info!("backend closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::storage::StorageError;
    use crate::vector::index::ResolvedParams;

    /// Memory storage whose writes can be made to fail or to stall.
    #[derive(Debug)]
    struct FaultyStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
        slow_writes: AtomicBool,
    }

    impl FaultyStorage {
        fn new() -> Self {
            FaultyStorage {
                inner: MemoryStorage::new_default(),
                fail_writes: AtomicBool::new(false),
                slow_writes: AtomicBool::new(false),
            }
        }
    }

    impl Storage for FaultyStorage {
        fn read(&self, name: &str) -> Result<Vec<u8>> {
            self.inner.read(name)
        }

        fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::io(name, "no space left on device").into());
            }
            if self.slow_writes.load(Ordering::SeqCst) && storage::is_temporary(name) {
                thread::sleep(Duration::from_millis(300));
            }
            self.inner.write(name, bytes)
        }

        fn exists(&self, name: &str) -> bool {
            self.inner.exists(name)
        }

        fn remove(&self, name: &str) -> Result<()> {
            self.inner.remove(name)
        }

        fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename(from, to)
        }

        fn list(&self) -> Result<Vec<String>> {
            self.inner.list()
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    fn schema(name: &str, dimension: i64, metric: Metric) -> CollectionSchema {
        CollectionSchema::builder(name, dimension)
            .metric(metric)
            .build()
            .unwrap()
    }

    fn row(id: &str, vector: Vec<f32>, doc_id: &str) -> StoredRow {
        StoredRow {
            id: id.to_string(),
            vector: vector.into(),
            content: format!("content of {id}"),
            doc_id: doc_id.to_string(),
            metadata: metadata::EMPTY_METADATA_BLOB.to_string(),
            created_at: None,
            updated_at: Utc::now(),
        }
    }

    fn query(vector: Vec<f32>, top_k: usize) -> AnnQuery {
        AnnQuery {
            vector,
            top_k,
            ef: 64,
            filter: None,
            output_fields: vec![ID_FIELD.to_string(), DOC_ID_FIELD.to_string()],
            include_vector: false,
        }
    }

    fn hnsw(metric: Metric) -> IndexDescription {
        IndexDescription {
            field: VECTOR_FIELD.to_string(),
            metric,
            params: ResolvedParams::Hnsw {
                m: 8,
                ef_construction: 64,
            },
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_rows_are_invisible_until_flush() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        backend.load_collection("docs").unwrap();

        backend
            .insert("docs", vec![row("a", vec![0.0, 0.0], "d1")])
            .unwrap();
        assert!(backend.search("docs", &query(vec![0.0, 0.0], 5)).unwrap().is_empty());
        assert_eq!(backend.collection_stats("docs").unwrap().pending_row_count, 1);

        backend.flush("docs").unwrap();
        let hits = backend.search("docs", &query(vec![0.0, 0.0], 5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(
            hits[0].fields.get(DOC_ID_FIELD),
            Some(&StoredValue::Text("d1".to_string()))
        );
    }

    #[test]
    fn test_search_requires_load() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        assert!(matches!(
            backend.search("docs", &query(vec![0.0, 0.0], 5)),
            Err(RagStoreError::CollectionNotLoaded(_))
        ));
        assert!(matches!(
            backend.search("missing", &query(vec![0.0, 0.0], 5)),
            Err(RagStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_upsert_replaces_row_and_keeps_created_at() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        backend.create_index("docs", &hnsw(Metric::L2)).unwrap();
        backend.load_collection("docs").unwrap();

        backend
            .insert("docs", vec![row("a", vec![0.0, 0.0], "d1")])
            .unwrap();
        backend.flush("docs").unwrap();
        let created = backend.collection("docs").unwrap().read().rows.values().next().unwrap().stored.created_at;
        assert!(created.is_some());

        backend
            .insert("docs", vec![row("a", vec![10.0, 10.0], "d2")])
            .unwrap();
        backend.flush("docs").unwrap();

        let stats = backend.collection_stats("docs").unwrap();
        assert_eq!(stats.row_count, 1);
        let handle = backend.collection("docs").unwrap();
        let state = handle.read();
        let stored = &state.rows.values().next().unwrap().stored;
        assert_eq!(stored.doc_id, "d2");
        assert_eq!(stored.created_at, created);
        assert_eq!(state.index.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_ids_in_one_flush_keep_the_last() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        backend.load_collection("docs").unwrap();
        backend
            .insert(
                "docs",
                vec![row("a", vec![0.0, 0.0], "first"), row("a", vec![1.0, 0.0], "second")],
            )
            .unwrap();
        backend.flush("docs").unwrap();

        let hits = backend.search("docs", &query(vec![0.0, 0.0], 10)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].fields.get(DOC_ID_FIELD),
            Some(&StoredValue::Text("second".to_string()))
        );
    }

    #[test]
    fn test_delete_covers_staged_and_visible_rows() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        backend
            .insert(
                "docs",
                vec![row("a", vec![0.0, 0.0], "d1"), row("b", vec![1.0, 0.0], "d2")],
            )
            .unwrap();
        backend.flush("docs").unwrap();
        backend
            .insert("docs", vec![row("c", vec![2.0, 0.0], "d1")])
            .unwrap();

        let deleted = backend.delete("docs", &FilterExpr::doc_id_eq("d1")).unwrap();
        assert_eq!(deleted, 2);
        let stats = backend.collection_stats("docs").unwrap();
        assert_eq!(stats.row_count, 1);
        assert_eq!(stats.pending_row_count, 0);

        assert_eq!(backend.delete("docs", &FilterExpr::doc_id_eq("d1")).unwrap(), 0);
    }

    #[test]
    fn test_selective_filter_falls_back_to_scan() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        backend.create_index("docs", &hnsw(Metric::L2)).unwrap();
        backend.load_collection("docs").unwrap();

        let rows: Vec<StoredRow> = (0..300)
            .map(|i| {
                let doc = if i == 299 { "rare" } else { "common" };
                row(&format!("r{i}"), vec![i as f32, 0.0], doc)
            })
            .collect();
        backend.insert("docs", rows).unwrap();
        backend.flush("docs").unwrap();

        let mut q = query(vec![0.0, 0.0], 3);
        q.ef = 8;
        q.filter = Some(FilterExpr::doc_id_eq("rare"));
        let hits = backend.search("docs", &q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "r299");
    }

    #[test]
    fn test_reopen_restores_rows_and_index() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        {
            let backend = EmbeddedBackend::open(storage.clone(), DEFAULT_INDEX_SEED).unwrap();
            backend.create_collection(&schema("docs", 2, Metric::Cosine)).unwrap();
            backend.create_index("docs", &hnsw(Metric::Cosine)).unwrap();
            backend
                .insert(
                    "docs",
                    vec![row("a", vec![1.0, 0.0], "d1"), row("b", vec![0.0, 1.0], "d2")],
                )
                .unwrap();
            backend.flush("docs").unwrap();
            backend
                .insert("docs", vec![row("unflushed", vec![1.0, 1.0], "d3")])
                .unwrap();
            backend.close().unwrap();
        }

        let backend = EmbeddedBackend::open(storage, DEFAULT_INDEX_SEED).unwrap();
        let info = backend.describe_collection("docs").unwrap();
        assert!(!info.loaded);
        assert_eq!(
            info.index.map(|d| d.algorithm()),
            Some(crate::vector::index::IndexAlgorithm::Hnsw)
        );

        backend.load_collection("docs").unwrap();
        let hits = backend.search("docs", &query(vec![1.0, 0.0], 5)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_drop_collection_removes_snapshot() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        assert!(backend.storage().exists("docs.snapshot"));

        backend.drop_collection("docs").unwrap();
        assert!(!backend.storage().exists("docs.snapshot"));
        assert!(!backend.has_collection("docs").unwrap());
        assert!(matches!(
            backend.drop_collection("docs"),
            Err(RagStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_closed_backend_is_unavailable() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.close().unwrap();
        assert!(matches!(
            backend.ping(),
            Err(RagStoreError::EngineUnavailable(_))
        ));
        assert!(matches!(
            backend.list_collections(),
            Err(RagStoreError::EngineUnavailable(_))
        ));
    }

    fn hit_ids(backend: &EmbeddedBackend) -> Vec<String> {
        backend
            .search("docs", &query(vec![1.0, 0.0], 10))
            .unwrap()
            .into_iter()
            .map(|hit| hit.id)
            .collect()
    }

    #[test]
    fn test_failed_persist_changes_nothing() {
        let storage = Arc::new(FaultyStorage::new());
        let backend = EmbeddedBackend::open(storage.clone(), DEFAULT_INDEX_SEED).unwrap();
        backend.create_collection(&schema("docs", 2, Metric::Cosine)).unwrap();
        backend.load_collection("docs").unwrap();
        backend
            .insert("docs", vec![row("a", vec![1.0, 0.0], "d1")])
            .unwrap();
        backend.flush("docs").unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        let token = backend
            .insert("docs", vec![row("b", vec![0.0, 1.0], "d2")])
            .unwrap();
        assert!(backend.flush("docs").is_err());
        assert_eq!(hit_ids(&backend), vec!["a"]);
        assert_eq!(backend.collection_stats("docs").unwrap().pending_row_count, 1);
        assert_eq!(backend.discard("docs", token).unwrap(), 1);
        assert_eq!(backend.collection_stats("docs").unwrap().pending_row_count, 0);

        assert!(backend.delete("docs", &FilterExpr::doc_id_eq("d1")).is_err());
        assert_eq!(hit_ids(&backend), vec!["a"]);

        assert!(backend.create_index("docs", &hnsw(Metric::Cosine)).is_err());
        assert!(backend.describe_collection("docs").unwrap().index.is_none());

        storage.fail_writes.store(false, Ordering::SeqCst);
        let reopened = EmbeddedBackend::open(storage, DEFAULT_INDEX_SEED).unwrap();
        reopened.load_collection("docs").unwrap();
        assert_eq!(hit_ids(&reopened), vec!["a"]);
    }

    #[test]
    fn test_drop_is_not_undone_by_an_in_flight_flush() {
        let storage = Arc::new(FaultyStorage::new());
        let backend = EmbeddedBackend::open(storage.clone(), DEFAULT_INDEX_SEED).unwrap();
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        let rows = (0..20)
            .map(|i| row(&format!("r{i}"), vec![i as f32, 0.0], "d1"))
            .collect();
        backend.insert("docs", rows).unwrap();

        storage.slow_writes.store(true, Ordering::SeqCst);
        thread::scope(|scope| {
            let flusher = scope.spawn(|| backend.flush("docs"));
            thread::sleep(Duration::from_millis(50));
            backend.drop_collection("docs").unwrap();
            // Either the flush finished first or it found the collection gone.
            let _ = flusher.join().unwrap();
        });
        storage.slow_writes.store(false, Ordering::SeqCst);

        assert!(!storage.exists("docs.snapshot"));
        let reopened = EmbeddedBackend::open(storage, DEFAULT_INDEX_SEED).unwrap();
        assert!(reopened.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_stale_handle_cannot_write_after_drop() {
        let backend = EmbeddedBackend::in_memory(DEFAULT_INDEX_SEED);
        backend.create_collection(&schema("docs", 2, Metric::L2)).unwrap();
        let stale = backend.collection("docs").unwrap();

        backend.drop_collection("docs").unwrap();
        backend.create_collection(&schema("docs", 3, Metric::L2)).unwrap();

        let state = stale.read();
        assert!(matches!(
            backend.persist(&state, &state.to_snapshot()),
            Err(RagStoreError::NotFound(_))
        ));
        drop(state);
        assert_eq!(backend.describe_collection("docs").unwrap().schema.dimension, 3);

        let bytes = backend.storage().read("docs.snapshot").unwrap();
        assert_eq!(snapshot::decode(&bytes).unwrap().schema.dimension, 3);
    }
}
