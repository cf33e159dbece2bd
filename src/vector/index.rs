//! Vector index configuration and implementations.
//!
//! A collection carries at most one index on its vector field. The index is
//! described by an [`IndexSpec`] supplied by callers and resolved into an
//! [`IndexDescription`] with concrete parameters. Three algorithms are
//! available:
//!
//! - [`flat::FlatIndex`]: exact scan
//! - [`hnsw::HnswIndex`]: layered proximity graph
//! - [`ivf::IvfFlatIndex`]: k-means partitioned inverted lists

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};
use crate::vector::core::distance::Metric;
use crate::vector::schema::VECTOR_FIELD;

pub mod flat;
pub mod hnsw;
pub mod ivf;

/// Engine-internal row identifier. Assigned in insertion order.
pub type RowId = u64;

pub const DEFAULT_HNSW_M: usize = 16;
pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_IVF_NLIST: usize = 4096;
pub const DEFAULT_IVF_NPROBE: usize = 16;

/// Supported index algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexAlgorithm {
    Flat,
    Hnsw,
    IvfFlat,
}

impl IndexAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            IndexAlgorithm::Flat => "FLAT",
            IndexAlgorithm::Hnsw => "HNSW",
            IndexAlgorithm::IvfFlat => "IVF_FLAT",
        }
    }

    /// Parse an algorithm name (case-insensitive).
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FLAT" => Ok(IndexAlgorithm::Flat),
            "HNSW" => Ok(IndexAlgorithm::Hnsw),
            "IVF_FLAT" | "IVFFLAT" => Ok(IndexAlgorithm::IvfFlat),
            _ => Err(RagStoreError::unsupported_algorithm(s)),
        }
    }
}

impl fmt::Display for IndexAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexAlgorithm {
    type Err = RagStoreError;

    fn from_str(s: &str) -> Result<Self> {
        IndexAlgorithm::parse_str(s)
    }
}

/// Optional tuning parameters. Unset values take the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    #[serde(default, rename = "M", alias = "m", skip_serializing_if = "Option::is_none")]
    pub m: Option<usize>,
    #[serde(
        default,
        rename = "efConstruction",
        alias = "ef_construction",
        skip_serializing_if = "Option::is_none"
    )]
    pub ef_construction: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlist: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nprobe: Option<usize>,
}

/// Index request as supplied by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub algorithm: String,
    pub metric: Metric,
    #[serde(default)]
    pub params: IndexParams,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(algorithm: S, metric: Metric) -> Self {
        IndexSpec {
            field: VECTOR_FIELD.to_string(),
            algorithm: algorithm.into(),
            metric,
            params: IndexParams::default(),
        }
    }

    pub fn hnsw(metric: Metric) -> Self {
        Self::new(IndexAlgorithm::Hnsw.name(), metric)
    }

    pub fn ivf_flat(metric: Metric) -> Self {
        Self::new(IndexAlgorithm::IvfFlat.name(), metric)
    }

    pub fn flat(metric: Metric) -> Self {
        Self::new(IndexAlgorithm::Flat.name(), metric)
    }

    pub fn on_field<S: Into<String>>(mut self, field: S) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.params.m = Some(m);
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.params.ef_construction = Some(ef_construction);
        self
    }

    pub fn with_nlist(mut self, nlist: usize) -> Self {
        self.params.nlist = Some(nlist);
        self
    }

    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.params.nprobe = Some(nprobe);
        self
    }
}

/// Default tuning values used when a spec leaves a parameter unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDefaults {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub ivf_nlist: usize,
    pub ivf_nprobe: usize,
}

impl Default for IndexDefaults {
    fn default() -> Self {
        IndexDefaults {
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construction: DEFAULT_HNSW_EF_CONSTRUCTION,
            ivf_nlist: DEFAULT_IVF_NLIST,
            ivf_nprobe: DEFAULT_IVF_NPROBE,
        }
    }
}

/// Concrete parameters of a built index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedParams {
    Flat,
    Hnsw { m: usize, ef_construction: usize },
    IvfFlat { nlist: usize, nprobe: usize },
}

impl ResolvedParams {
    pub fn algorithm(&self) -> IndexAlgorithm {
        match self {
            ResolvedParams::Flat => IndexAlgorithm::Flat,
            ResolvedParams::Hnsw { .. } => IndexAlgorithm::Hnsw,
            ResolvedParams::IvfFlat { .. } => IndexAlgorithm::IvfFlat,
        }
    }

    /// Resolve a spec against defaults, rejecting unknown algorithms and
    /// zero-valued parameters.
    pub fn resolve(spec: &IndexSpec, defaults: &IndexDefaults) -> Result<Self> {
        let algorithm = IndexAlgorithm::parse_str(&spec.algorithm)?;
        let positive = |name: &str, value: Option<usize>, default: usize| -> Result<usize> {
            match value.unwrap_or(default) {
                0 => Err(RagStoreError::validation(format!(
                    "index parameter {name} must be positive"
                ))),
                v => Ok(v),
            }
        };

        Ok(match algorithm {
            IndexAlgorithm::Flat => ResolvedParams::Flat,
            IndexAlgorithm::Hnsw => {
                let m = positive("M", spec.params.m, defaults.hnsw_m)?;
                let ef_construction = positive(
                    "efConstruction",
                    spec.params.ef_construction,
                    defaults.hnsw_ef_construction,
                )?;
                ResolvedParams::Hnsw { m, ef_construction }
            }
            IndexAlgorithm::IvfFlat => ResolvedParams::IvfFlat {
                nlist: positive("nlist", spec.params.nlist, defaults.ivf_nlist)?,
                nprobe: positive("nprobe", spec.params.nprobe, defaults.ivf_nprobe)?,
            },
        })
    }
}

/// A built index as reported by `describe_collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub field: String,
    pub metric: Metric,
    pub params: ResolvedParams,
    pub built_at: DateTime<Utc>,
}

impl IndexDescription {
    pub fn algorithm(&self) -> IndexAlgorithm {
        self.params.algorithm()
    }
}

/// A candidate returned by an index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row_id: RowId,
    pub distance: f32,
}

impl Neighbor {
    pub fn new(row_id: RowId, distance: f32) -> Self {
        Neighbor { row_id, distance }
    }

    /// Closest first, ties by row id.
    pub fn cmp_by_distance(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.row_id.cmp(&other.row_id))
    }
}

/// Common interface of the index implementations.
///
/// Indexes own a copy of the vectors they cover and are mutated only under
/// the owning collection's write lock.
pub trait AnnIndex: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> IndexAlgorithm;

    /// Add or replace a vector.
    fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()>;

    /// Add many vectors. Rows are inserted in ascending row id order.
    fn insert_batch(&mut self, rows: &mut [(RowId, Vec<f32>)]) -> Result<()> {
        rows.sort_by_key(|(row_id, _)| *row_id);
        for (row_id, vector) in rows.iter() {
            self.insert(*row_id, vector)?;
        }
        Ok(())
    }

    /// Remove a vector. Returns whether it was present.
    fn remove(&mut self, row_id: RowId) -> bool;

    /// Up to `k` nearest candidates, closest first. `ef` is the search
    /// breadth for algorithms that have one.
    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create an empty index for the given parameters.
pub fn new_index(
    params: &ResolvedParams,
    metric: Metric,
    dimension: usize,
    seed: u64,
) -> Box<dyn AnnIndex> {
    match params {
        ResolvedParams::Flat => Box::new(flat::FlatIndex::new(metric)),
        ResolvedParams::Hnsw { m, ef_construction } => Box::new(hnsw::HnswIndex::new(
            hnsw::HnswConfig::new(dimension)
                .with_m(*m)
                .with_ef_construction(*ef_construction)
                .with_metric(metric)
                .with_seed(seed),
        )),
        ResolvedParams::IvfFlat { nlist, nprobe } => Box::new(ivf::IvfFlatIndex::new(
            ivf::IvfConfig {
                nlist: *nlist,
                nprobe: *nprobe,
                metric,
                seed,
            },
        )),
    }
}
