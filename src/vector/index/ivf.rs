//! IVF_FLAT (inverted file) index.
//!
//! Rows are partitioned by k-means into clusters; a search scores the query
//! against the centroids and scans the rows of the `nprobe` closest clusters
//! exactly.
//!
//! Clusters are trained lazily: the first insert trains on whatever rows
//! exist, and the index retrains whenever the row count has grown fourfold
//! since the last training. Between trainings new rows join their nearest
//! existing cluster.

use std::collections::BTreeMap;

use ahash::AHashMap;
use log::debug;
use rand::prelude::*;
use rayon::prelude::*;

use crate::error::Result;
use crate::vector::core::distance::Metric;
use crate::vector::index::flat::exact_scan;
use crate::vector::index::{AnnIndex, IndexAlgorithm, Neighbor, RowId};

const MAX_ITERATIONS: usize = 100;
const CONVERGENCE_THRESHOLD: f32 = 1e-6;
const RETRAIN_GROWTH_FACTOR: usize = 4;
const PARALLEL_ASSIGN_THRESHOLD: usize = 1000;

/// IVF configuration.
#[derive(Debug, Clone)]
pub struct IvfConfig {
    /// Upper bound on the number of clusters.
    pub nlist: usize,
    /// Clusters scanned per query.
    pub nprobe: usize,
    pub metric: Metric,
    /// Seed for k-means++ initialisation.
    pub seed: u64,
}

/// Inverted-file index with exact scoring inside probed clusters.
#[derive(Debug)]
pub struct IvfFlatIndex {
    config: IvfConfig,
    centroids: Vec<Vec<f32>>,
    /// Row ids per cluster, sorted ascending.
    lists: Vec<Vec<RowId>>,
    vectors: BTreeMap<RowId, Vec<f32>>,
    assignment: AHashMap<RowId, usize>,
    trained_rows: usize,
}

impl IvfFlatIndex {
    pub fn new(config: IvfConfig) -> Self {
        Self {
            config,
            centroids: Vec::new(),
            lists: Vec::new(),
            vectors: BTreeMap::new(),
            assignment: AHashMap::new(),
            trained_rows: 0,
        }
    }

    /// Number of trained clusters.
    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    /// Cluster count for a dataset: `sqrt(n)` rounded up, capped by `nlist`.
    fn target_clusters(&self, n_vectors: usize) -> usize {
        let clusters = (n_vectors as f64).sqrt().ceil() as usize;
        clusters.clamp(1, self.config.nlist.max(1)).min(n_vectors.max(1))
    }

    fn needs_training(&self) -> bool {
        self.centroids.is_empty()
            || self.vectors.len() >= self.trained_rows.max(1) * RETRAIN_GROWTH_FACTOR
    }

    fn find_nearest_centroid(&self, vector: &[f32]) -> usize {
        nearest(self.config.metric, &self.centroids, vector)
    }

    fn assign(&mut self, row_id: RowId) {
        let Some(vector) = self.vectors.get(&row_id) else {
            return;
        };
        let cluster = self.find_nearest_centroid(vector);
        if let Some(list) = self.lists.get_mut(cluster) {
            if let Err(pos) = list.binary_search(&row_id) {
                list.insert(pos, row_id);
            }
            self.assignment.insert(row_id, cluster);
        }
    }

    fn unassign(&mut self, row_id: RowId) {
        if let Some(cluster) = self.assignment.remove(&row_id) {
            if let Some(list) = self.lists.get_mut(cluster) {
                if let Ok(pos) = list.binary_search(&row_id) {
                    list.remove(pos);
                }
            }
        }
    }

    /// Train centroids with k-means over every stored row and rebuild the lists.
    fn train(&mut self) {
        let rows: Vec<(RowId, &[f32])> = self
            .vectors
            .iter()
            .map(|(row_id, v)| (*row_id, v.as_slice()))
            .collect();
        if rows.is_empty() {
            self.centroids.clear();
            self.lists.clear();
            self.assignment.clear();
            self.trained_rows = 0;
            return;
        }

        let k = self.target_clusters(rows.len());
        let metric = self.config.metric;
        let mut centroids = init_centroids_kmeans_plus_plus(metric, &rows, k, self.config.seed);

        let mut iterations = 0;
        for iteration in 0..MAX_ITERATIONS {
            iterations = iteration + 1;
            let assignments = assign_vectors_to_clusters(metric, &centroids, &rows);
            let updated = update_centroids(&centroids, &assignments, &rows);
            let movement = compute_convergence(&centroids, &updated);
            centroids = updated;
            if movement < CONVERGENCE_THRESHOLD {
                break;
            }
        }

        let assignments = assign_vectors_to_clusters(metric, &centroids, &rows);
        let mut lists = vec![Vec::new(); centroids.len()];
        let mut assignment = AHashMap::with_capacity(rows.len());
        for ((row_id, _), cluster) in rows.iter().zip(assignments) {
            lists[cluster].push(*row_id);
            assignment.insert(*row_id, cluster);
        }

        debug!(
            "trained IVF index: {} rows, {} clusters, {} iterations",
            rows.len(),
            centroids.len(),
            iterations
        );

        self.trained_rows = rows.len();
        self.centroids = centroids;
        self.lists = lists;
        self.assignment = assignment;
    }
}

fn nearest(metric: Metric, centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best_cluster = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = metric.distance(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }
    best_cluster
}

/// k-means++ seeding: each next centroid is drawn with probability
/// proportional to its squared distance from the closest chosen one.
fn init_centroids_kmeans_plus_plus(
    metric: Metric,
    rows: &[(RowId, &[f32])],
    k: usize,
    seed: u64,
) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first = rng.random_range(0..rows.len());
    centroids.push(rows[first].1.to_vec());

    let mut min_distances: Vec<f32> = rows
        .iter()
        .map(|(_, v)| metric.distance(v, &centroids[0]).max(0.0))
        .collect();

    while centroids.len() < k {
        let weights: Vec<f32> = min_distances.iter().map(|d| d * d).collect();
        let total_weight: f32 = weights.iter().sum();
        if total_weight <= 0.0 {
            // Every remaining row coincides with a centroid.
            break;
        }

        let target = rng.random::<f32>() * total_weight;
        let mut cumsum = 0.0;
        let mut chosen = rows.len() - 1;
        for (i, weight) in weights.iter().enumerate() {
            cumsum += weight;
            if cumsum >= target && *weight > 0.0 {
                chosen = i;
                break;
            }
        }

        let centroid = rows[chosen].1.to_vec();
        for (min_distance, (_, v)) in min_distances.iter_mut().zip(rows) {
            *min_distance = min_distance.min(metric.distance(v, &centroid).max(0.0));
        }
        centroids.push(centroid);
    }

    centroids
}

fn assign_vectors_to_clusters(
    metric: Metric,
    centroids: &[Vec<f32>],
    rows: &[(RowId, &[f32])],
) -> Vec<usize> {
    if rows.len() > PARALLEL_ASSIGN_THRESHOLD {
        rows.par_iter()
            .map(|(_, v)| nearest(metric, centroids, v))
            .collect()
    } else {
        rows.iter()
            .map(|(_, v)| nearest(metric, centroids, v))
            .collect()
    }
}

/// Mean of each cluster; empty clusters keep their previous centroid.
fn update_centroids(
    centroids: &[Vec<f32>],
    assignments: &[usize],
    rows: &[(RowId, &[f32])],
) -> Vec<Vec<f32>> {
    let dimension = centroids.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dimension]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for ((_, vector), &cluster) in rows.iter().zip(assignments) {
        counts[cluster] += 1;
        for (sum, value) in sums[cluster].iter_mut().zip(vector.iter()) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(centroids)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| s / count as f32).collect()
            }
        })
        .collect()
}

/// Mean Euclidean movement between two centroid sets.
fn compute_convergence(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    if old.len() != new.len() || old.is_empty() {
        return f32::INFINITY;
    }
    let total: f32 = old
        .iter()
        .zip(new)
        .map(|(a, b)| Metric::L2.distance(a, b))
        .sum();
    total / old.len() as f32
}

impl AnnIndex for IvfFlatIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::IvfFlat
    }

    fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()> {
        self.unassign(row_id);
        self.vectors.insert(row_id, vector.to_vec());
        if self.needs_training() {
            self.train();
        } else {
            self.assign(row_id);
        }
        Ok(())
    }

    fn insert_batch(&mut self, rows: &mut [(RowId, Vec<f32>)]) -> Result<()> {
        rows.sort_by_key(|(row_id, _)| *row_id);
        for (row_id, vector) in rows.iter() {
            self.unassign(*row_id);
            self.vectors.insert(*row_id, vector.clone());
        }
        if self.needs_training() {
            self.train();
        } else {
            for (row_id, _) in rows.iter() {
                self.assign(*row_id);
            }
        }
        Ok(())
    }

    fn remove(&mut self, row_id: RowId) -> bool {
        self.unassign(row_id);
        let removed = self.vectors.remove(&row_id).is_some();
        if self.vectors.is_empty() {
            self.train();
        }
        removed
    }

    fn search(&self, query: &[f32], k: usize, _ef: usize) -> Vec<Neighbor> {
        if self.centroids.is_empty() || k == 0 {
            return Vec::new();
        }

        let metric = self.config.metric;
        let mut probes: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, centroid)| (metric.distance(query, centroid), i))
            .collect();
        probes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let candidates = probes
            .into_iter()
            .take(self.config.nprobe.max(1))
            .flat_map(|(_, cluster)| self.lists[cluster].iter())
            .filter_map(|row_id| {
                self.vectors
                    .get(row_id)
                    .map(|v| (*row_id, v.as_slice()))
            });

        exact_scan(metric, query, candidates, k)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
