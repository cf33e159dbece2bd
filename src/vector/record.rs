//! Records written into a collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector::metadata::{Metadata, MetadataValue};

/// One row of data as supplied by callers.
///
/// `id` is caller-supplied and unique per collection; inserting an existing id
/// replaces the stored row. Optional payload fields default to empty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, alias = "docId", skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VectorRecord {
    pub fn new<S: Into<String>>(id: S, vector: Vec<f32>) -> Self {
        VectorRecord {
            id: id.into(),
            vector,
            content: None,
            doc_id: None,
            metadata: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_doc_id<S: Into<String>>(mut self, doc_id: S) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Add one metadata entry, creating the map if needed.
    pub fn with_metadata_entry<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let record = VectorRecord::new("a", vec![1.0, 0.0, 0.0])
            .with_content("hello")
            .with_doc_id("d1")
            .with_metadata_entry("category", "faq")
            .with_metadata_entry("page", 3i64);

        assert_eq!(record.content.as_deref(), Some("hello"));
        assert_eq!(record.doc_id.as_deref(), Some("d1"));
        assert_eq!(record.metadata.as_ref().map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let record: VectorRecord =
            serde_json::from_str(r#"{"id":"a","vector":[1.0,0.0],"docId":"d1"}"#).unwrap();

        assert_eq!(record.id, "a");
        assert_eq!(record.doc_id.as_deref(), Some("d1"));
        assert!(record.content.is_none());
        assert!(record.metadata.is_none());
    }
}
