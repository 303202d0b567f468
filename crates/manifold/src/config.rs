//! Configuration and error types for the manifold layer.
//!
//! Everything here is plain data. A [`ReducerConfig`] is the unfit half of a
//! reducer: it describes the projection and only [`ReducerConfig::fit`]
//! turns it into a [`crate::FittedReducer`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance used to build the input neighbour graph.
///
/// The low-dimensional layout is always optimised in Euclidean space; the
/// metric only governs which points count as neighbours.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `1 - cos(a, b)`, computed on L2-normalised rows.
    Cosine,
    #[default]
    Euclidean,
}

/// Neighbour search backend selection.
///
/// Exact search is the default and is bit-reproducible. The HNSW backend is
/// opt-in: its graph depends on insertion interleaving across threads, so two
/// runs may disagree on a handful of neighbours.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NeighborConfig {
    /// Use the HNSW index when the dataset is large enough.
    pub use_ann: bool,
    /// Below this many rows exact search is used even if `use_ann = true`.
    pub min_vectors_for_ann: usize,
    /// Number of links per HNSW node.
    pub m: usize,
    /// Candidate list size while building the index.
    pub ef_construction: usize,
    /// Candidate list size while querying. Raised to at least `k`.
    pub ef_search: usize,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            use_ann: false,
            min_vectors_for_ann: 5_000,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl NeighborConfig {
    pub fn with_ann(mut self, use_ann: bool) -> Self {
        self.use_ann = use_ann;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Check if HNSW should be used for a dataset of `num_vectors` rows.
    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        self.use_ann && num_vectors >= self.min_vectors_for_ann
    }
}

/// Clamp range for the intrinsic dimension estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntrinsicConfig {
    pub min_dimension: usize,
    pub max_dimension: usize,
}

impl Default for IntrinsicConfig {
    fn default() -> Self {
        Self {
            min_dimension: 5,
            max_dimension: 50,
        }
    }
}

impl IntrinsicConfig {
    pub fn with_range(mut self, min_dimension: usize, max_dimension: usize) -> Self {
        self.min_dimension = min_dimension;
        self.max_dimension = max_dimension;
        self
    }

    pub fn validate(&self) -> Result<(), ManifoldError> {
        if self.min_dimension == 0 || self.min_dimension > self.max_dimension {
            return Err(ManifoldError::InvalidDimensionRange {
                min: self.min_dimension,
                max: self.max_dimension,
            });
        }
        Ok(())
    }
}

/// Unfit manifold reducer.
///
/// Two reducers run back to back in the pipeline: [`ReducerConfig::stage_one`]
/// maps raw embeddings onto the intrinsic dimension under the cosine metric,
/// and [`ReducerConfig::stage_two`] compresses that result to a small fixed
/// dimension for clustering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReducerConfig {
    /// Size of the local neighbourhood, the point itself included.
    pub n_neighbors: usize,
    /// Output dimensionality.
    pub n_components: usize,
    pub metric: Metric,
    /// Minimum spacing of points in the output. `0.0` packs neighbours tightly,
    /// which is what density clustering wants downstream.
    pub min_dist: f32,
    /// Scale of the output. Together with `min_dist` it fixes the curve
    /// parameters `a` and `b`.
    pub spread: f32,
    /// SGD epochs. `None` picks 500 for up to 10 000 rows and 200 above.
    pub n_epochs: Option<usize>,
    pub learning_rate: f32,
    /// Negative samples drawn per positive edge sample.
    pub negative_sample_rate: usize,
    /// Weight of the repulsive term.
    pub repulsion_strength: f32,
    /// Seed for initialisation noise and negative sampling.
    ///
    /// Same seed, same input, same output, bit for bit (exact neighbours only).
    pub seed: u64,
    pub neighbors: NeighborConfig,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            n_components: 2,
            metric: Metric::Euclidean,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            seed: 42,
            neighbors: NeighborConfig::default(),
        }
    }
}

impl ReducerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one: 100 neighbours, cosine, tight packing, `n_components` set to
    /// the intrinsic dimension estimate.
    pub fn stage_one(n_components: usize) -> Self {
        Self {
            n_neighbors: 100,
            n_components,
            metric: Metric::Cosine,
            min_dist: 0.0,
            ..Self::default()
        }
    }

    /// Stage two: 20 neighbours, Euclidean, ten output dimensions.
    pub fn stage_two() -> Self {
        Self {
            n_neighbors: 20,
            n_components: 10,
            metric: Metric::Euclidean,
            min_dist: 0.0,
            ..Self::default()
        }
    }

    pub fn with_n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = n_neighbors;
        self
    }

    pub fn with_n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_min_dist(mut self, min_dist: f32) -> Self {
        self.min_dist = min_dist;
        self
    }

    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = Some(n_epochs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_neighbors(mut self, neighbors: NeighborConfig) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Epoch count for a fit over `n_rows` rows.
    pub fn fit_epochs(&self, n_rows: usize) -> usize {
        self.n_epochs
            .unwrap_or(if n_rows <= 10_000 { 500 } else { 200 })
    }

    /// Epoch count used when embedding new rows against a fit of `n_rows`.
    pub fn transform_epochs(&self, n_rows: usize) -> usize {
        match self.n_epochs {
            Some(epochs) => (epochs / 3).max(1),
            None if n_rows <= 10_000 => 100,
            None => 30,
        }
    }

    pub fn validate(&self) -> Result<(), ManifoldError> {
        if self.n_neighbors < 2 {
            return Err(ManifoldError::InvalidNeighbors {
                n_neighbors: self.n_neighbors,
            });
        }
        if self.n_components == 0 {
            return Err(ManifoldError::InvalidComponents);
        }
        let spread_ok = self.spread.is_finite() && self.spread > 0.0;
        let min_dist_ok = self.min_dist.is_finite() && self.min_dist >= 0.0;
        if !spread_ok || !min_dist_ok || self.min_dist > self.spread {
            return Err(ManifoldError::InvalidMinDist {
                min_dist: self.min_dist,
                spread: self.spread,
            });
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ManifoldError::InvalidLearningRate {
                learning_rate: self.learning_rate,
            });
        }
        if self.n_epochs == Some(0) {
            return Err(ManifoldError::InvalidEpochs);
        }
        Ok(())
    }
}

/// Errors returned by the manifold layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ManifoldError {
    #[error("insufficient data: got {n} rows, need at least {min}")]
    InsufficientData { n: usize, min: usize },

    #[error("input shape mismatch: expected {expected} columns, got {got}")]
    InputShape { expected: usize, got: usize },

    #[error("non-finite value in row {row}")]
    NonFinite { row: usize },

    #[error("every point coincides with its nearest neighbour; dimension is undefined")]
    NoDistinctNeighbors,

    #[error("invalid config: n_neighbors must be >= 2 (got {n_neighbors})")]
    InvalidNeighbors { n_neighbors: usize },

    #[error("invalid config: n_components must be >= 1")]
    InvalidComponents,

    #[error("invalid config: need 0 <= min_dist <= spread and spread > 0 (got min_dist={min_dist}, spread={spread})")]
    InvalidMinDist { min_dist: f32, spread: f32 },

    #[error("invalid config: learning_rate must be > 0 (got {learning_rate})")]
    InvalidLearningRate { learning_rate: f32 },

    #[error("invalid config: n_epochs must be >= 1")]
    InvalidEpochs,

    #[error("invalid config: dimension range [{min}, {max}] is empty or starts at 0")]
    InvalidDimensionRange { min: usize, max: usize },
}
