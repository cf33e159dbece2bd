//! Batch insert and delete.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{RagStoreError, Result};
use crate::vector::backend::StoredRow;
use crate::vector::core::vector::Vector;
use crate::vector::engine::response::InsertResult;
use crate::vector::engine::{VectorStore, engine_error};
use crate::vector::filter::FilterExpr;
use crate::vector::metadata::{self, EMPTY_METADATA_BLOB};
use crate::vector::record::VectorRecord;
use crate::vector::schema::{
    CONTENT_FIELD, CollectionSchema, DOC_ID_FIELD, ID_FIELD, METADATA_FIELD,
};

impl VectorStore {
    /// Insert a batch of records and flush, so the whole batch is visible to
    /// every search once this returns.
    ///
    /// The batch is validated before anything reaches the backend; one bad
    /// record rejects the batch. Omitted content, doc id and metadata default
    /// to empty values. Inserting an existing id replaces that record, and
    /// when an id repeats within the batch the last record wins.
    pub fn batch_insert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<InsertResult> {
        if records.is_empty() {
            return Err(RagStoreError::validation("insert batch is empty"));
        }
        let backend = self.backend()?;
        let info = backend
            .describe_collection(collection)
            .map_err(engine_error)?;

        let rows = prepare_rows(&info.schema, &records, Utc::now())?;
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

        let mutation_token = backend.insert(collection, rows).map_err(engine_error)?;
        if let Err(err) = backend.flush(collection) {
            if let Err(discard_err) = backend.discard(collection, mutation_token) {
                warn!("could not discard mutation {mutation_token} in {collection}: {discard_err}");
            }
            return Err(engine_error(err));
        }
        debug!(
            "inserted {} records into {collection} (mutation {mutation_token})",
            ids.len()
        );

        Ok(InsertResult {
            insert_count: ids.len(),
            ids,
            mutation_token,
        })
    }

    /// Delete records by id. Unknown ids are ignored; an empty list is a
    /// no-op.
    pub fn delete_by_ids<S: AsRef<str>>(&self, collection: &str, ids: &[S]) -> Result<bool> {
        let backend = self.backend()?;
        if ids.is_empty() {
            if !backend.has_collection(collection).map_err(engine_error)? {
                return Err(RagStoreError::not_found(format!("collection '{collection}'")));
            }
            return Ok(true);
        }
        let filter = FilterExpr::id_in(ids.iter().map(|id| id.as_ref().to_string()));
        let removed = backend.delete(collection, &filter).map_err(engine_error)?;
        debug!("deleted {removed} records from {collection} by id");
        Ok(true)
    }

    /// Delete every chunk of one source document.
    pub fn delete_by_owning_document(&self, collection: &str, doc_id: &str) -> Result<bool> {
        if doc_id.is_empty() {
            return Err(RagStoreError::validation("doc id must not be empty"));
        }
        let removed = self
            .backend()?
            .delete(collection, &FilterExpr::doc_id_eq(doc_id))
            .map_err(engine_error)?;
        debug!("deleted {removed} records of document {doc_id} from {collection}");
        Ok(true)
    }

    /// Delete every record matching a filter expression. Returns the number
    /// of records removed.
    pub fn delete_by_filter(&self, collection: &str, expression: &str) -> Result<usize> {
        let filter = FilterExpr::parse(expression)?;
        let removed = self
            .backend()?
            .delete(collection, &filter)
            .map_err(engine_error)?;
        debug!("deleted {removed} records from {collection} matching {filter}");
        Ok(removed)
    }
}

/// Validate and materialise a batch. Validation is split into
/// `shards_num` chunks checked on the rayon pool.
fn prepare_rows(
    schema: &CollectionSchema,
    records: &[VectorRecord],
    now: DateTime<Utc>,
) -> Result<Vec<StoredRow>> {
    if let Some(record) = records.iter().find(|r| r.vector.len() != schema.dimension) {
        return Err(RagStoreError::dimension_mismatch(
            schema.dimension,
            record.vector.len(),
        ));
    }

    let chunk_size = records.len().div_ceil(schema.shards_num.max(1)).max(1);
    let chunks: Vec<Vec<StoredRow>> = records
        .par_chunks(chunk_size)
        .map(|chunk| {
            chunk
                .iter()
                .map(|record| prepare_row(schema, record, now))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows: Vec<StoredRow> = Vec::with_capacity(records.len());
    let mut position: AHashMap<String, usize> = AHashMap::with_capacity(records.len());
    for row in chunks.into_iter().flatten() {
        match position.get(&row.id) {
            Some(&i) => rows[i] = row,
            None => {
                position.insert(row.id.clone(), rows.len());
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn prepare_row(
    schema: &CollectionSchema,
    record: &VectorRecord,
    now: DateTime<Utc>,
) -> Result<StoredRow> {
    let check_length = |field: &str, value: &str| -> Result<()> {
        match schema.max_length(field) {
            Some(max) if value.len() > max => Err(RagStoreError::validation(format!(
                "record '{}': {field} is {} bytes, limit is {max}",
                record.id,
                value.len()
            ))),
            _ => Ok(()),
        }
    };

    if record.id.is_empty() {
        return Err(RagStoreError::validation("record id must not be empty"));
    }
    check_length(ID_FIELD, &record.id)?;
    let vector = Vector::from(record.vector.clone());
    if !vector.is_valid() {
        return Err(RagStoreError::validation(format!(
            "record '{}': vector contains NaN or infinite values",
            record.id
        )));
    }

    let content = record.content.clone().unwrap_or_default();
    check_length(CONTENT_FIELD, &content)?;
    let doc_id = record.doc_id.clone().unwrap_or_default();
    check_length(DOC_ID_FIELD, &doc_id)?;
    let metadata = match &record.metadata {
        Some(m) => metadata::encode(m)?,
        None => EMPTY_METADATA_BLOB.to_string(),
    };
    check_length(METADATA_FIELD, &metadata)?;

    Ok(StoredRow {
        id: record.id.clone(),
        vector,
        content,
        doc_id,
        metadata,
        created_at: record.created_at,
        updated_at: record.updated_at.unwrap_or(now),
    })
}
