//! Collection schema definitions.
//!
//! Every collection uses the same record layout: a caller-supplied string
//! primary key, one float vector, a text payload, the owning document id and
//! an encoded metadata blob. Only the bounds and the vector shape vary.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};
use crate::vector::core::distance::Metric;

/// Primary key field.
pub const ID_FIELD: &str = "id";
/// Vector field.
pub const VECTOR_FIELD: &str = "embedding";
/// Free-text payload field.
pub const CONTENT_FIELD: &str = "content";
/// Owning document id field.
pub const DOC_ID_FIELD: &str = "doc_id";
/// Encoded metadata field.
pub const METADATA_FIELD: &str = "metadata";

pub const DEFAULT_ID_MAX_LENGTH: usize = 64;
pub const DEFAULT_CONTENT_MAX_LENGTH: usize = 65535;
pub const DEFAULT_DOC_ID_MAX_LENGTH: usize = 64;
pub const DEFAULT_METADATA_MAX_LENGTH: usize = 4096;
pub const DEFAULT_SHARDS_NUM: usize = 2;

const MAX_COLLECTION_NAME_LENGTH: usize = 255;

static COLLECTION_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// Data kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Bounded identifier string.
    Identifier { max_length: usize },
    /// Fixed-dimension float vector.
    FloatVector { dimension: usize },
    /// Bounded free text.
    Text { max_length: usize },
    /// Encoded key/value metadata blob.
    Metadata { max_length: usize },
}

impl FieldKind {
    /// Maximum byte length for variable-length kinds.
    pub fn max_length(&self) -> Option<usize> {
        match self {
            FieldKind::Identifier { max_length }
            | FieldKind::Text { max_length }
            | FieldKind::Metadata { max_length } => Some(*max_length),
            FieldKind::FloatVector { .. } => None,
        }
    }
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldSchema {
    pub fn new<S: Into<String>>(name: S, kind: FieldKind) -> Self {
        FieldSchema {
            name: name.into(),
            kind,
            is_primary: false,
            description: String::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// Definition of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub dimension: usize,
    pub metric: Metric,
    pub shards_num: usize,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Start building a schema with the standard field layout.
    pub fn builder<S: Into<String>>(name: S, dimension: i64) -> CollectionSchemaBuilder {
        CollectionSchemaBuilder::new(name, dimension)
    }

    /// Check every structural rule of a schema.
    pub fn validate(&self) -> Result<()> {
        validate_collection_name(&self.name)?;

        if self.dimension == 0 {
            return Err(RagStoreError::invalid_schema(
                "vector dimension must be positive",
            ));
        }
        if self.shards_num == 0 {
            return Err(RagStoreError::invalid_schema(
                "shards_num must be positive",
            ));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(RagStoreError::invalid_schema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            if field.kind.max_length() == Some(0) {
                return Err(RagStoreError::invalid_schema(format!(
                    "field '{}' must have a positive max length",
                    field.name
                )));
            }
        }

        let primaries: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.is_primary).collect();
        match primaries.as_slice() {
            [field] if field.name == ID_FIELD
                && matches!(field.kind, FieldKind::Identifier { .. }) => {}
            [_] => {
                return Err(RagStoreError::invalid_schema(format!(
                    "primary key must be the identifier field '{ID_FIELD}'"
                )));
            }
            _ => {
                return Err(RagStoreError::invalid_schema(
                    "schema must have exactly one primary key",
                ));
            }
        }

        let vectors: Vec<&FieldSchema> = self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::FloatVector { .. }))
            .collect();
        match vectors.as_slice() {
            [field] => {
                if field.name != VECTOR_FIELD {
                    return Err(RagStoreError::invalid_schema(format!(
                        "vector field must be named '{VECTOR_FIELD}'"
                    )));
                }
                if field.kind != (FieldKind::FloatVector { dimension: self.dimension }) {
                    return Err(RagStoreError::invalid_schema(
                        "vector field dimension differs from collection dimension",
                    ));
                }
            }
            _ => {
                return Err(RagStoreError::invalid_schema(
                    "schema must have exactly one vector field",
                ));
            }
        }

        for required in [CONTENT_FIELD, DOC_ID_FIELD, METADATA_FIELD] {
            if self.field(required).is_none() {
                return Err(RagStoreError::invalid_schema(format!(
                    "missing required field '{required}'"
                )));
            }
        }

        Ok(())
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the vector field.
    pub fn vector_field(&self) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| matches!(f.kind, FieldKind::FloatVector { .. }))
    }

    /// Byte bound of a variable-length field, if it has one.
    pub fn max_length(&self, name: &str) -> Option<usize> {
        self.field(name).and_then(|f| f.kind.max_length())
    }
}

/// Builder for [`CollectionSchema`].
#[derive(Debug, Clone)]
pub struct CollectionSchemaBuilder {
    name: String,
    description: String,
    dimension: i64,
    metric: Metric,
    shards_num: usize,
    id_max_length: usize,
    content_max_length: usize,
    doc_id_max_length: usize,
    metadata_max_length: usize,
}

impl CollectionSchemaBuilder {
    fn new<S: Into<String>>(name: S, dimension: i64) -> Self {
        CollectionSchemaBuilder {
            name: name.into(),
            description: String::new(),
            dimension,
            metric: Metric::default(),
            shards_num: DEFAULT_SHARDS_NUM,
            id_max_length: DEFAULT_ID_MAX_LENGTH,
            content_max_length: DEFAULT_CONTENT_MAX_LENGTH,
            doc_id_max_length: DEFAULT_DOC_ID_MAX_LENGTH,
            metadata_max_length: DEFAULT_METADATA_MAX_LENGTH,
        }
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn shards_num(mut self, shards_num: usize) -> Self {
        self.shards_num = shards_num;
        self
    }

    pub fn id_max_length(mut self, max_length: usize) -> Self {
        self.id_max_length = max_length;
        self
    }

    pub fn content_max_length(mut self, max_length: usize) -> Self {
        self.content_max_length = max_length;
        self
    }

    pub fn doc_id_max_length(mut self, max_length: usize) -> Self {
        self.doc_id_max_length = max_length;
        self
    }

    pub fn metadata_max_length(mut self, max_length: usize) -> Self {
        self.metadata_max_length = max_length;
        self
    }

    /// Build and validate the schema.
    pub fn build(self) -> Result<CollectionSchema> {
        if self.dimension <= 0 {
            return Err(RagStoreError::invalid_schema(format!(
                "vector dimension must be positive, got {}",
                self.dimension
            )));
        }
        let dimension = usize::try_from(self.dimension)
            .map_err(|_| RagStoreError::invalid_schema("vector dimension is too large"))?;

        let fields = vec![
            FieldSchema::new(
                ID_FIELD,
                FieldKind::Identifier {
                    max_length: self.id_max_length,
                },
            )
            .primary()
            .with_description("chunk id"),
            FieldSchema::new(VECTOR_FIELD, FieldKind::FloatVector { dimension })
                .with_description("embedding vector"),
            FieldSchema::new(
                CONTENT_FIELD,
                FieldKind::Text {
                    max_length: self.content_max_length,
                },
            )
            .with_description("chunk text"),
            FieldSchema::new(
                DOC_ID_FIELD,
                FieldKind::Identifier {
                    max_length: self.doc_id_max_length,
                },
            )
            .with_description("owning document id"),
            FieldSchema::new(
                METADATA_FIELD,
                FieldKind::Metadata {
                    max_length: self.metadata_max_length,
                },
            )
            .with_description("encoded metadata"),
        ];

        let schema = CollectionSchema {
            name: self.name,
            description: self.description,
            dimension,
            metric: self.metric,
            shards_num: self.shards_num,
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }
}

/// Check a collection name against the naming rules.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(RagStoreError::invalid_schema(format!(
            "collection name must be 1..={MAX_COLLECTION_NAME_LENGTH} bytes"
        )));
    }
    let valid = match COLLECTION_NAME_RE.as_ref() {
        Some(re) => re.is_match(name),
        None => false,
    };
    if !valid {
        return Err(RagStoreError::invalid_schema(format!(
            "invalid collection name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_schema_layout() {
        let schema = CollectionSchema::builder("docs", 3)
            .metric(Metric::Cosine)
            .description("test")
            .build()
            .unwrap();

        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "embedding", "content", "doc_id", "metadata"]);
        assert_eq!(schema.shards_num, 2);
        assert_eq!(schema.max_length(ID_FIELD), Some(64));
        assert_eq!(schema.max_length(CONTENT_FIELD), Some(65535));
        assert_eq!(schema.max_length(METADATA_FIELD), Some(4096));
        assert_eq!(schema.vector_field().map(|f| f.name.as_str()), Some("embedding"));
    }

    #[test]
    fn test_non_positive_dimension_rejected() {
        for dimension in [0, -1, -1536] {
            assert!(matches!(
                CollectionSchema::builder("docs", dimension).build(),
                Err(RagStoreError::InvalidSchema(_))
            ));
        }
    }

    #[test]
    fn test_collection_name_rules() {
        assert!(validate_collection_name("rag_chunks").is_ok());
        assert!(validate_collection_name("_tmp1").is_ok());
        assert!(validate_collection_name("1docs").is_err());
        assert!(validate_collection_name("my-docs").is_err());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_detects_broken_layouts() {
        let mut schema = CollectionSchema::builder("docs", 4).build().unwrap();
        schema.fields.push(FieldSchema::new(
            "extra",
            FieldKind::FloatVector { dimension: 4 },
        ));
        assert!(schema.validate().is_err());

        let mut schema = CollectionSchema::builder("docs", 4).build().unwrap();
        schema.fields.retain(|f| f.name != DOC_ID_FIELD);
        assert!(schema.validate().is_err());

        assert!(
            CollectionSchema::builder("docs", 4)
                .shards_num(0)
                .build()
                .is_err()
        );
    }
}
