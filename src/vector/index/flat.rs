//! Flat (exact scan) index.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::error::Result;
use crate::vector::core::distance::Metric;
use crate::vector::index::{AnnIndex, IndexAlgorithm, Neighbor, RowId};

/// Rows above which the scan runs on the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 1000;

/// Exact nearest-neighbor index that compares the query against every row.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    vectors: BTreeMap<RowId, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        FlatIndex {
            metric,
            vectors: BTreeMap::new(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::Flat
    }

    fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()> {
        self.vectors.insert(row_id, vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, row_id: RowId) -> bool {
        self.vectors.remove(&row_id).is_some()
    }

    fn search(&self, query: &[f32], k: usize, _ef: usize) -> Vec<Neighbor> {
        exact_scan(
            self.metric,
            query,
            self.vectors.iter().map(|(row_id, v)| (*row_id, v.as_slice())),
            k,
        )
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

/// Score every candidate and keep the `k` closest, ties broken by row id.
pub fn exact_scan<'a, I>(metric: Metric, query: &[f32], rows: I, k: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (RowId, &'a [f32])>,
{
    let rows: Vec<(RowId, &[f32])> = rows.into_iter().collect();
    let mut neighbors: Vec<Neighbor> = if rows.len() > PARALLEL_SCAN_THRESHOLD {
        rows.par_iter()
            .map(|(row_id, v)| Neighbor::new(*row_id, metric.distance(query, v)))
            .collect()
    } else {
        rows.iter()
            .map(|(row_id, v)| Neighbor::new(*row_id, metric.distance(query, v)))
            .collect()
    };

    neighbors.sort_by(Neighbor::cmp_by_distance);
    neighbors.truncate(k);
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_returns_exact_order() {
        let mut index = FlatIndex::new(Metric::L2);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.insert(2, &[1.0, 0.0]).unwrap();
        index.insert(3, &[5.0, 5.0]).unwrap();

        let result = index.search(&[0.9, 0.0], 2, 64);
        let rows: Vec<RowId> = result.iter().map(|n| n.row_id).collect();
        assert_eq!(rows, vec![2, 1]);
    }

    #[test]
    fn test_flat_remove() {
        let mut index = FlatIndex::new(Metric::Cosine);
        index.insert(1, &[1.0, 0.0]).unwrap();
        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 5, 64).is_empty());
    }

    #[test]
    fn test_exact_scan_parallel_path_is_sorted() {
        let data: Vec<Vec<f32>> = (0..2000).map(|i| vec![(i % 100) as f32]).collect();
        let result = exact_scan(
            Metric::L2,
            &[0.0],
            data.iter().enumerate().map(|(i, v)| (i as RowId, v.as_slice())),
            5,
        );
        let rows: Vec<RowId> = result.iter().map(|n| n.row_id).collect();
        assert_eq!(rows, vec![0, 100, 200, 300, 400]);
    }
}
