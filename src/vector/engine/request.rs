//! Search request model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DEFAULT_CANDIDATE_MULTIPLIER, DEFAULT_TOP_K};
use crate::error::{RagStoreError, Result};
use crate::vector::filter::FilterExpr;

/// Largest accepted `top_k`.
pub const MAX_TOP_K: usize = 100;
/// Largest accepted `candidate_multiplier`.
pub const MAX_CANDIDATE_MULTIPLIER: usize = 100;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_candidate_multiplier() -> usize {
    DEFAULT_CANDIDATE_MULTIPLIER
}

fn default_decode_metadata() -> bool {
    true
}

/// Request model for a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Number of results, within [1, 100].
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,
    /// Breadth factor: the index explores `top_k * candidate_multiplier`
    /// candidates (at least 64).
    #[serde(default = "default_candidate_multiplier", alias = "candidateMultiplier")]
    pub candidate_multiplier: usize,
    /// Filter expression, e.g. `doc_id == 'd1' and metadata.page > 2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Equality filters combined with `and`; array values match any element.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, Value>,
    /// Target collection for [`crate::VectorStore::search_default`].
    #[serde(default, alias = "collectionName", skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    /// Echo the query vector and return stored vectors with each result.
    #[serde(default, alias = "outputVector")]
    pub output_vector: bool,
    /// Decode stored metadata. When false the raw blob is returned instead.
    #[serde(default = "default_decode_metadata", alias = "decodeMetadata")]
    pub decode_metadata: bool,
}

impl SearchRequest {
    pub fn new(vector: Vec<f32>) -> Self {
        SearchRequest {
            vector,
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            filter: None,
            filters: BTreeMap::new(),
            collection_name: None,
            output_vector: false,
            decode_metadata: default_decode_metadata(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_candidate_multiplier(mut self, candidate_multiplier: usize) -> Self {
        self.candidate_multiplier = candidate_multiplier;
        self
    }

    pub fn with_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Add an equality filter on `field`.
    pub fn with_equality<K: Into<String>, V: Into<Value>>(mut self, field: K, value: V) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn in_collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.collection_name = Some(collection.into());
        self
    }

    pub fn with_output_vector(mut self, output_vector: bool) -> Self {
        self.output_vector = output_vector;
        self
    }

    pub fn with_decode_metadata(mut self, decode_metadata: bool) -> Self {
        self.decode_metadata = decode_metadata;
        self
    }

    /// Checks that need no collection state.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(RagStoreError::validation(format!(
                "topK must be within [1, {MAX_TOP_K}], got {}",
                self.top_k
            )));
        }
        if !(1..=MAX_CANDIDATE_MULTIPLIER).contains(&self.candidate_multiplier) {
            return Err(RagStoreError::validation(format!(
                "candidateMultiplier must be within [1, {MAX_CANDIDATE_MULTIPLIER}], got {}",
                self.candidate_multiplier
            )));
        }
        if self.vector.is_empty() {
            return Err(RagStoreError::validation("query vector is empty"));
        }
        if self.vector.iter().any(|x| !x.is_finite()) {
            return Err(RagStoreError::validation(
                "query vector contains NaN or infinite values",
            ));
        }
        Ok(())
    }

    /// Query dimension check against a collection.
    pub fn validate_dimension(&self, dimension: usize) -> Result<()> {
        if self.vector.len() != dimension {
            return Err(RagStoreError::validation(format!(
                "query vector has dimension {}, collection expects {dimension}",
                self.vector.len()
            )));
        }
        Ok(())
    }

    /// Search breadth: `max(top_k * candidate_multiplier, min_ef)`.
    pub fn effective_ef(&self, min_ef: usize) -> usize {
        self.top_k
            .saturating_mul(self.candidate_multiplier)
            .max(min_ef)
    }

    /// The combined filter of `filter` and `filters`.
    pub fn filter_expr(&self) -> Result<Option<FilterExpr>> {
        let parsed = self
            .filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(FilterExpr::parse)
            .transpose()?;
        let equalities = FilterExpr::from_equality_map(&self.filters)?;
        Ok(FilterExpr::conjoin(parsed, equalities))
    }
}
