//! Result types returned by the engine.

use serde::{Deserialize, Serialize};

use crate::vector::metadata::Metadata;

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// Metric score: cosine similarity, inner product, or L2 distance.
    pub score: f32,
    pub content: String,
    pub doc_id: String,
    pub metadata: Metadata,
    /// Stored metadata blob, present when decoding was not requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_metadata: Option<String>,
    /// Stored vector, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub collection: String,
    /// Best first.
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f32>>,
    pub took_ms: u64,
}

impl SearchResponse {
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResult {
    pub insert_count: usize,
    pub ids: Vec<String>,
    /// Backend-assigned, increasing per backend.
    pub mutation_token: u64,
}
