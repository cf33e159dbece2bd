//! Dense vector value type.

use serde::{Deserialize, Serialize};

use crate::error::{RagStoreError, Result};

/// Embedding components as stored in a row. Serializes as a plain array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    pub data: Vec<f32>,
}

impl Vector {
    pub fn new(data: Vec<f32>) -> Self {
        Vector { data }
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Fails with `DimensionMismatch` unless the vector has `dimension` components.
    pub fn check_dimension(&self, dimension: usize) -> Result<()> {
        match self.dimension() {
            actual if actual == dimension => Ok(()),
            actual => Err(RagStoreError::dimension_mismatch(dimension, actual)),
        }
    }

    /// False if any component is NaN or infinite.
    pub fn is_valid(&self) -> bool {
        self.data.iter().copied().all(f32::is_finite)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}
