//! HNSW (Hierarchical Navigable Small World) index for approximate search.
//!
//! HNSW builds a multi-layer proximity graph where each layer contains a
//! subset of the nodes from the layer below. Searches descend greedily from
//! the sparse top layer and finish with a breadth-`ef` best-first search on
//! layer 0.
//!
//! Level assignment is seeded per row, and neighbor lists are kept sorted by
//! node position, so the graph built for a given insertion order is always
//! the same.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ahash::{AHashMap, AHashSet};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};
use crate::vector::core::distance::Metric;
use crate::vector::index::{AnnIndex, IndexAlgorithm, Neighbor, RowId};

/// Hard cap on node levels.
const MAX_LEVEL: usize = 16;

/// Minimum slot count before tombstones trigger a rebuild.
const COMPACTION_MIN_SLOTS: usize = 64;

/// Configuration for HNSW index construction and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Connections selected per node on insert, and the cap on layers above 0.
    pub m: usize,
    /// Connection cap on layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Multiplier that controls the probability of layer assignment.
    pub ml: f64,
    /// Size of the candidate set during construction.
    pub ef_construction: usize,
    /// Seed for level assignment.
    pub seed: u64,
    /// Vector dimension.
    pub dimension: usize,
    /// Metric used for distances.
    pub metric: Metric,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ml: 1.0 / (16.0_f64).ln(),
            ef_construction: 200,
            seed: 42,
            dimension: 128,
            metric: Metric::Cosine,
        }
    }
}

impl HnswConfig {
    /// Create a new HNSW configuration with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Set the M parameter (connections per node).
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self.m_max0 = m.saturating_mul(2);
        self.ml = 1.0 / (m.max(2) as f64).ln();
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagStoreError::validation("HNSW dimension must be > 0"));
        }
        if self.m == 0 {
            return Err(RagStoreError::validation("HNSW M must be > 0"));
        }
        if self.ef_construction == 0 {
            return Err(RagStoreError::validation("HNSW efConstruction must be > 0"));
        }
        Ok(())
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m_max0 } else { self.m }
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone)]
struct HnswNode {
    row_id: RowId,
    vector: Vec<f32>,
    /// `connections[layer]` holds neighbor positions, sorted ascending.
    connections: Vec<Vec<usize>>,
}

impl HnswNode {
    fn new(row_id: RowId, vector: Vec<f32>, level: usize) -> Self {
        Self {
            row_id,
            vector,
            connections: vec![Vec::new(); level + 1],
        }
    }

    fn level(&self) -> usize {
        self.connections.len().saturating_sub(1)
    }

    fn neighbors(&self, layer: usize) -> &[usize] {
        self.connections.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    fn add_connection(&mut self, layer: usize, node: usize) {
        if let Some(list) = self.connections.get_mut(layer) {
            if let Err(pos) = list.binary_search(&node) {
                list.insert(pos, node);
            }
        }
    }

    fn remove_connection(&mut self, layer: usize, node: usize) {
        if let Some(list) = self.connections.get_mut(layer) {
            if let Ok(pos) = list.binary_search(&node) {
                list.remove(pos);
            }
        }
    }
}

/// Priority queue entry for HNSW search.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SearchCandidate {
    distance: f32,
    node: usize,
}

impl Eq for SearchCandidate {}

impl PartialOrd for SearchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

/// HNSW index implementation for approximate nearest neighbor search.
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    /// Node slots; removed nodes leave `None` until the next compaction.
    nodes: Vec<Option<HnswNode>>,
    row_to_node: AHashMap<RowId, usize>,
    entry_point: Option<usize>,
    max_layer: usize,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            row_to_node: AHashMap::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    fn node(&self, idx: usize) -> Option<&HnswNode> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    /// Level for a row, derived from the seed and the row id only.
    fn select_layer(&self, row_id: RowId) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.config.seed ^ row_id.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let uniform: f64 = rng.random();
        let level = (-uniform.max(f64::MIN_POSITIVE).ln() * self.config.ml).floor();
        (level as usize).min(MAX_LEVEL)
    }

    /// Best-first search on one layer. Returns up to `ef` candidates, closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<SearchCandidate> {
        let ef = ef.max(1);
        let mut visited = AHashSet::new();
        let mut candidates = BinaryHeap::new(); // min-heap via Reverse
        let mut results = BinaryHeap::new(); // max-heap, farthest on top

        for &entry in entry_points {
            if let Some(node) = self.node(entry) {
                if visited.insert(entry) {
                    let candidate = SearchCandidate {
                        distance: self.config.metric.distance(query, &node.vector),
                        node: entry,
                    };
                    candidates.push(Reverse(candidate));
                    results.push(candidate);
                }
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if let Some(farthest) = results.peek() {
                if results.len() >= ef && current.distance > farthest.distance {
                    break;
                }
            }

            let Some(current_node) = self.node(current.node) else {
                continue;
            };
            for &neighbor in current_node.neighbors(layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(neighbor_node) = self.node(neighbor) else {
                    continue;
                };
                let candidate = SearchCandidate {
                    distance: self.config.metric.distance(query, &neighbor_node.vector),
                    node: neighbor,
                };

                let improves = results.len() < ef
                    || results.peek().is_some_and(|farthest| candidate < *farthest);
                if improves {
                    candidates.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found = results.into_vec();
        found.sort();
        found
    }

    /// Greedy descent from the entry point down to `target_layer + 1`.
    fn descend(&self, query: &[f32], entry: usize, target_layer: usize) -> Vec<usize> {
        let mut current = vec![entry];
        let mut layer = self.max_layer;
        while layer > target_layer {
            let closest = self.search_layer(query, &current, 1, layer);
            if let Some(best) = closest.first() {
                current = vec![best.node];
            }
            layer -= 1;
        }
        current
    }

    /// Keep the `max_connections` closest neighbors of a node on a layer.
    fn prune_connections(&mut self, idx: usize, layer: usize, max_connections: usize) {
        let kept = {
            let Some(node) = self.node(idx) else {
                return;
            };
            let list = node.neighbors(layer);
            if list.len() <= max_connections {
                return;
            }
            let mut scored: Vec<SearchCandidate> = list
                .iter()
                .filter_map(|&n| {
                    self.node(n).map(|other| SearchCandidate {
                        distance: self.config.metric.distance(&node.vector, &other.vector),
                        node: n,
                    })
                })
                .collect();
            scored.sort();
            let mut kept: Vec<usize> = scored
                .into_iter()
                .take(max_connections)
                .map(|c| c.node)
                .collect();
            kept.sort_unstable();
            kept
        };

        if let Some(Some(node)) = self.nodes.get_mut(idx) {
            if let Some(list) = node.connections.get_mut(layer) {
                *list = kept;
            }
        }
    }

    /// Link a freshly appended node into every layer it belongs to.
    fn connect_new_node(&mut self, idx: usize, vector: &[f32], level: usize, entry: usize) {
        let top = level.min(self.max_layer);
        let mut entry_points = self.descend(vector, entry, top);

        for layer in (0..=top).rev() {
            let ef = self.config.ef_construction.max(self.config.m);
            let candidates = self.search_layer(vector, &entry_points, ef, layer);
            let selected: Vec<usize> = candidates
                .iter()
                .filter(|c| c.node != idx)
                .take(self.config.m)
                .map(|c| c.node)
                .collect();

            let max_connections = self.config.max_connections(layer);
            for &neighbor in &selected {
                if let Some(Some(node)) = self.nodes.get_mut(idx) {
                    node.add_connection(layer, neighbor);
                }
                let overflow = match self.nodes.get_mut(neighbor) {
                    Some(Some(node)) => {
                        node.add_connection(layer, idx);
                        node.neighbors(layer).len() > max_connections
                    }
                    _ => false,
                };
                if overflow {
                    self.prune_connections(neighbor, layer, max_connections);
                }
            }

            if !candidates.is_empty() {
                entry_points = candidates.into_iter().map(|c| c.node).collect();
            }
        }
    }

    /// Pick the live node with the highest level (lowest position on ties).
    fn find_new_entry_point(&mut self) {
        let mut best: Option<(usize, usize)> = None;
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                if best.is_none_or(|(_, level)| node.level() > level) {
                    best = Some((idx, node.level()));
                }
            }
        }
        self.entry_point = best.map(|(idx, _)| idx);
        self.max_layer = best.map_or(0, |(_, level)| level);
    }

    /// Rebuild the graph from live nodes once tombstones dominate.
    fn maybe_compact(&mut self) {
        let live = self.row_to_node.len();
        if self.nodes.len() < COMPACTION_MIN_SLOTS || self.nodes.len() <= live * 2 {
            return;
        }

        let mut rows: Vec<(RowId, Vec<f32>)> = self
            .nodes
            .drain(..)
            .flatten()
            .map(|node| (node.row_id, node.vector))
            .collect();
        rows.sort_by_key(|(row_id, _)| *row_id);

        self.row_to_node.clear();
        self.entry_point = None;
        self.max_layer = 0;
        for (row_id, vector) in rows {
            self.add(row_id, vector);
        }
    }

    fn add(&mut self, row_id: RowId, vector: Vec<f32>) {
        let level = self.select_layer(row_id);
        let idx = self.nodes.len();
        let query = vector.clone();
        self.nodes.push(Some(HnswNode::new(row_id, vector, level)));
        self.row_to_node.insert(row_id, idx);

        match self.entry_point {
            None => {
                self.entry_point = Some(idx);
                self.max_layer = level;
            }
            Some(entry) => {
                self.connect_new_node(idx, &query, level, entry);
                if level > self.max_layer {
                    self.entry_point = Some(idx);
                    self.max_layer = level;
                }
            }
        }
    }
}

impl AnnIndex for HnswIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::Hnsw
    }

    fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(RagStoreError::dimension_mismatch(
                self.config.dimension,
                vector.len(),
            ));
        }
        if self.row_to_node.contains_key(&row_id) {
            self.remove(row_id);
        }
        self.add(row_id, vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, row_id: RowId) -> bool {
        let Some(idx) = self.row_to_node.remove(&row_id) else {
            return false;
        };
        let Some(removed) = self.nodes.get_mut(idx).and_then(Option::take) else {
            return false;
        };

        // Detach, then let former neighbors adopt each other so the layer
        // stays connected.
        for (layer, neighbors) in removed.connections.iter().enumerate() {
            let max_connections = self.config.max_connections(layer);
            for &neighbor in neighbors {
                let overflow = match self.nodes.get_mut(neighbor) {
                    Some(Some(node)) => {
                        node.remove_connection(layer, idx);
                        for &other in neighbors {
                            if other != neighbor && other != idx {
                                node.add_connection(layer, other);
                            }
                        }
                        node.neighbors(layer).len() > max_connections
                    }
                    _ => false,
                };
                if overflow {
                    self.prune_connections(neighbor, layer, max_connections);
                }
            }
        }

        if self.entry_point == Some(idx) {
            self.find_new_entry_point();
        }
        self.maybe_compact();
        true
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbor> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.config.dimension {
            return Vec::new();
        }

        let entry_points = self.descend(query, entry, 0);
        let candidates = self.search_layer(query, &entry_points, ef.max(k), 0);

        let mut neighbors: Vec<Neighbor> = candidates
            .into_iter()
            .filter_map(|c| {
                self.node(c.node)
                    .map(|node| Neighbor::new(node.row_id, c.distance))
            })
            .collect();
        neighbors.sort_by(Neighbor::cmp_by_distance);
        neighbors.truncate(k);
        neighbors
    }

    fn len(&self) -> usize {
        self.row_to_node.len()
    }
}
