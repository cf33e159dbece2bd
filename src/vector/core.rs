//! Core data structures for vector search.
//!
//! This module contains the vector value type and the similarity metrics used
//! throughout the indexes and the search path.

pub mod distance;
pub mod vector;
