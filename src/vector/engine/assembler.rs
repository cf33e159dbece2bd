//! Turns raw backend hits into [`SearchResult`]s.

use log::warn;

use crate::vector::backend::{RawHit, StoredValue};
use crate::vector::engine::response::SearchResult;
use crate::vector::metadata::{self, Metadata};
use crate::vector::schema::{CONTENT_FIELD, DOC_ID_FIELD, ID_FIELD, METADATA_FIELD, VECTOR_FIELD};

/// Scalar fields requested from the backend for every search.
pub fn output_fields() -> Vec<String> {
    [ID_FIELD, CONTENT_FIELD, DOC_ID_FIELD, METADATA_FIELD]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

/// Pure mapping from hits to results. Missing text fields become empty
/// strings; an unreadable metadata blob yields empty metadata and a warning.
#[derive(Debug, Clone, Copy)]
pub struct ResultAssembler {
    decode_metadata: bool,
    output_vector: bool,
}

impl ResultAssembler {
    pub fn new(decode_metadata: bool, output_vector: bool) -> Self {
        ResultAssembler {
            decode_metadata,
            output_vector,
        }
    }

    pub fn assemble(&self, hits: Vec<RawHit>) -> Vec<SearchResult> {
        hits.into_iter().map(|hit| self.assemble_hit(hit)).collect()
    }

    fn assemble_hit(&self, mut hit: RawHit) -> SearchResult {
        let mut text = |name: &str| match hit.fields.remove(name) {
            Some(StoredValue::Text(s)) => s,
            _ => String::new(),
        };
        let content = text(CONTENT_FIELD);
        let doc_id = text(DOC_ID_FIELD);
        let blob = text(METADATA_FIELD);

        let (metadata, raw_metadata) = if self.decode_metadata {
            let metadata = metadata::decode(&blob).unwrap_or_else(|e| {
                warn!("record {}: {e}; returning empty metadata", hit.id);
                Metadata::new()
            });
            (metadata, None)
        } else {
            (Metadata::new(), Some(blob))
        };

        let vector = if self.output_vector {
            match hit.fields.remove(VECTOR_FIELD) {
                Some(StoredValue::Vector(v)) => Some(v),
                _ => None,
            }
        } else {
            None
        };

        SearchResult {
            id: hit.id,
            score: hit.score,
            content,
            doc_id,
            metadata,
            raw_metadata,
            vector,
        }
    }
}
