//! HNSW index parameters.
//!
//! Parameters are fixed at construction and persisted with every snapshot;
//! loading restores the exact configuration the graph was built with.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// HNSW index parameters for tuning performance and recall.
///
/// Defaults follow the usual HNSW operating point: `m = 16`,
/// `ef_search = 200`, `ef_construction = max(64, ef_search)`, and the
/// level-decay constant `ml = 1/ln 2` (half the nodes at layer 0, a quarter
/// reaching layer 1, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Number of bi-directional links per node at layers >= 1.
    /// Layer 0 allows `2 * m`. Higher = better recall, more memory.
    pub m: usize,
    /// Size of the dynamic candidate list during construction.
    pub ef_construction: usize,
    /// Default candidate-list width during search (query-overridable).
    pub ef_search: usize,
    /// Level-assignment decay constant.
    pub ml: f64,
    /// Distance metric, fixed for the lifetime of the index.
    pub metric: DistanceMetric,
    /// Vector dimension. `None` lets the first insert determine it.
    pub dimension: Option<usize>,
    /// Optional hard cap on the number of live nodes.
    pub max_elements: Option<usize>,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

impl HnswParams {
    /// Default search width.
    pub const DEFAULT_EF_SEARCH: usize = 200;
    /// Default degree cap for layers >= 1.
    pub const DEFAULT_M: usize = 16;

    /// Creates default parameters for the given metric.
    #[must_use]
    pub fn new(metric: DistanceMetric) -> Self {
        let ef_search = Self::DEFAULT_EF_SEARCH;
        Self {
            m: Self::DEFAULT_M,
            ef_construction: ef_search.max(64),
            ef_search,
            ml: 1.0 / std::f64::consts::LN_2,
            metric,
            dimension: None,
            max_elements: None,
        }
    }

    /// Creates parameters with a declared dimension.
    ///
    /// Vectors of any other length are rejected from the first insert on.
    #[must_use]
    pub fn with_dimension(metric: DistanceMetric, dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::new(metric)
        }
    }

    /// Fast profile: lower degree and construction width, quicker inserts,
    /// lower recall. Best for small or short-lived indexes.
    #[must_use]
    pub fn fast(metric: DistanceMetric) -> Self {
        Self {
            m: 8,
            ef_construction: 100,
            ef_search: 64,
            ..Self::new(metric)
        }
    }

    /// High-recall profile: wider beams at both construction and query time.
    #[must_use]
    pub fn high_recall(metric: DistanceMetric) -> Self {
        Self {
            m: 32,
            ef_construction: 400,
            ef_search: 400,
            ..Self::new(metric)
        }
    }

    /// Degree cap at layer 0.
    #[must_use]
    pub const fn m0(&self) -> usize {
        self.m * 2
    }

    /// Validates the parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `m < 2`, any ef is zero, `ml` is not
    /// strictly positive and finite, or a declared dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::Config(format!("m must be >= 2, got {}", self.m)));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::Config(
                "ef_construction and ef_search must be >= 1".into(),
            ));
        }
        if !self.ml.is_finite() || self.ml <= 0.0 {
            return Err(Error::Config(format!(
                "ml must be finite and > 0, got {}",
                self.ml
            )));
        }
        if self.dimension == Some(0) {
            return Err(Error::Config("dimension must be >= 1".into()));
        }
        if self.max_elements == Some(0) {
            return Err(Error::Config("max_elements must be >= 1".into()));
        }
        Ok(())
    }
}
