//! Record metadata and its encoded blob form.
//!
//! Metadata is an open key/value mapping. Inside the engine it is a typed
//! [`MetadataValue`] tree; at rest it is stored as a JSON object string. All
//! conversions between the two live here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagStoreError, Result};

/// Key/value metadata attached to a record.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Encoded form of empty metadata.
pub const EMPTY_METADATA_BLOB: &str = "{}";

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(Metadata),
}

impl MetadataValue {
    /// Convert a JSON value into a metadata value.
    ///
    /// Numbers that do not fit an `f64` (never produced by `serde_json` for
    /// finite input) become `Null`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => MetadataValue::Null,
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::Number(n) => n.as_f64().map_or(MetadataValue::Null, MetadataValue::Number),
            Value::String(s) => MetadataValue::String(s),
            Value::Array(items) => {
                MetadataValue::List(items.into_iter().map(MetadataValue::from_json).collect())
            }
            Value::Object(map) => MetadataValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, MetadataValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert this value into JSON.
    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Null => Value::Null,
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            MetadataValue::String(s) => Value::String(s.clone()),
            MetadataValue::List(items) => {
                Value::Array(items.iter().map(MetadataValue::to_json).collect())
            }
            MetadataValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(value: Metadata) -> Self {
        MetadataValue::Map(value)
    }
}

/// Encode metadata into its stored blob form.
pub fn encode(metadata: &Metadata) -> Result<String> {
    if metadata.is_empty() {
        return Ok(EMPTY_METADATA_BLOB.to_string());
    }
    let object: serde_json::Map<String, Value> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Decode a stored blob. An empty blob decodes to empty metadata; anything
/// that is not a JSON object is [`RagStoreError::MalformedMetadata`].
pub fn decode(blob: &str) -> Result<Metadata> {
    if blob.trim().is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_str::<Value>(blob) {
        Ok(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, MetadataValue::from_json(v)))
            .collect()),
        Ok(other) => Err(RagStoreError::malformed_metadata(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(RagStoreError::malformed_metadata(e.to_string())),
    }
}

/// Resolve a dotted path (`a.b.c`) inside metadata.
pub fn lookup<'a>(metadata: &'a Metadata, path: &[String]) -> Option<&'a MetadataValue> {
    let (first, rest) = path.split_first()?;
    let mut current = metadata.get(first)?;
    for key in rest {
        match current {
            MetadataValue::Map(map) => current = map.get(key)?,
            _ => return None,
        }
    }
    Some(current)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
