//! On-disk snapshot of one collection.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic u32 | version u32 | payload length u64 | payload crc32 u32 | payload
//! ```
//!
//! The payload is the JSON encoding of [`CollectionSnapshot`].

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};
use crate::vector::backend::StoredRow;
use crate::vector::index::{IndexDescription, RowId};
use crate::vector::schema::CollectionSchema;

/// "RSNP"
const SNAPSHOT_MAGIC: u32 = 0x5253_4e50;
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// Persisted state of a collection. Staged rows and the loaded flag are not
/// part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub schema: CollectionSchema,
    pub created_at: DateTime<Utc>,
    pub index: Option<IndexDescription>,
    pub next_row_id: RowId,
    pub rows: Vec<SnapshotRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub row_id: RowId,
    #[serde(flatten)]
    pub row: StoredRow,
}

pub fn file_name(collection: &str) -> String {
    format!("{collection}{SNAPSHOT_SUFFIX}")
}

/// Collection name for a snapshot file, `None` for any other file.
pub fn collection_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(SNAPSHOT_SUFFIX)
        .filter(|name| !name.is_empty())
}

pub fn encode(snapshot: &CollectionSnapshot) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(snapshot)?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.write_u32::<LittleEndian>(SNAPSHOT_MAGIC)?;
    buf.write_u32::<LittleEndian>(SNAPSHOT_VERSION)?;
    buf.write_u64::<LittleEndian>(payload.len() as u64)?;
    buf.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<CollectionSnapshot> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(RagStoreError::storage(format!(
            "not a collection snapshot (magic {magic:#010x})"
        )));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != SNAPSHOT_VERSION {
        return Err(RagStoreError::storage(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let len = cursor.read_u64::<LittleEndian>()? as usize;
    let expected_crc = cursor.read_u32::<LittleEndian>()?;

    let mut payload = Vec::with_capacity(len);
    cursor.take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(RagStoreError::storage(format!(
            "truncated snapshot: expected {len} bytes, found {}",
            payload.len()
        )));
    }
    if crc32fast::hash(&payload) != expected_crc {
        return Err(RagStoreError::storage("snapshot checksum mismatch"));
    }

    Ok(serde_json::from_slice(&payload)?)
}
