//! Similarity metrics for vector search.
//!
//! Indexes rank candidates by an internal *distance* (lower is closer) for
//! every metric; [`Metric::score`] converts that distance back into the score
//! reported to callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};

/// Similarity metric declared by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity, reported in [-1, 1], higher is more similar.
    #[default]
    Cosine,
    /// Euclidean distance, reported as >= 0, lower is more similar.
    L2,
    /// Inner product, higher is more similar.
    InnerProduct,
}

impl Metric {
    /// Internal distance between two vectors of equal length. Lower is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => {
                let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0 // zero vectors are orthogonal to everything
                } else {
                    1.0 - (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
                }
            }
            Metric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt(),
            Metric::InnerProduct => -a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Convert an internal distance into the caller-facing score.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::L2 => distance,
            Metric::InnerProduct => -distance,
        }
    }

    /// Get the name of this metric.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
        }
    }

    /// Parse a metric from a string (case-insensitive).
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            "ip" | "inner_product" | "dot" | "dot_product" => Ok(Metric::InnerProduct),
            _ => Err(RagStoreError::validation(format!("Unknown metric: {s}"))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = RagStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::parse_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
        metric.score(metric.distance(a, b))
    }

    #[test]
    fn test_cosine_scores() {
        let metric = Metric::Cosine;

        assert!((score(metric, &[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(score(metric, &[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((score(metric, &[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(metric.distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_l2_scores() {
        let metric = Metric::L2;

        assert_eq!(score(metric, &[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(score(metric, &[1.0, 1.0], &[1.0, 1.0]), 0.0);
        assert!(metric.distance(&[0.0], &[1.0]) < metric.distance(&[0.0], &[2.0]));
    }

    #[test]
    fn test_inner_product_scores() {
        let metric = Metric::InnerProduct;

        assert_eq!(score(metric, &[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert!(metric.distance(&[1.0], &[11.0]) < metric.distance(&[1.0], &[2.0]));
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(Metric::parse_str("COSINE").unwrap(), Metric::Cosine);
        assert_eq!(Metric::parse_str("euclidean").unwrap(), Metric::L2);
        assert_eq!("IP".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert!(Metric::parse_str("hamming").is_err());
    }
}
