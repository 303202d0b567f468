//! Parameters and error types for density clustering.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thread usage for the core-distance pass.
///
/// Both settings produce identical numbers. `Single` exists so that tuning
/// trials never compete with each other for the rayon pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    #[default]
    Single,
    All,
}

/// Unfit clusterer.
///
/// Euclidean distance and excess-of-mass cluster selection are fixed; the
/// minimum spanning tree is always kept so validity can be scored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HdbscanParams {
    /// Neighbourhood size for core distances, the point itself included.
    pub min_samples: usize,
    /// Smallest group that counts as a cluster in the condensed tree.
    pub min_cluster_size: usize,
    /// Allow the root to be selected when it is the most stable cluster.
    pub allow_single_cluster: bool,
    pub core_parallelism: Parallelism,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_cluster_size: 5,
            allow_single_cluster: false,
            core_parallelism: Parallelism::Single,
        }
    }
}

impl HdbscanParams {
    pub fn new(min_samples: usize, min_cluster_size: usize) -> Self {
        Self {
            min_samples,
            min_cluster_size,
            ..Self::default()
        }
    }

    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.core_parallelism = parallelism;
        self
    }

    pub fn validate(&self) -> Result<(), DensityError> {
        if self.min_samples < 2 {
            return Err(DensityError::InvalidMinSamples {
                min_samples: self.min_samples,
            });
        }
        if self.min_cluster_size < 2 {
            return Err(DensityError::InvalidMinClusterSize {
                min_cluster_size: self.min_cluster_size,
            });
        }
        Ok(())
    }
}

/// Errors returned by fitting and prediction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DensityError {
    #[error("insufficient data: got {n} rows, need at least {min}")]
    InsufficientData { n: usize, min: usize },

    #[error("input shape mismatch: expected {expected} columns, got {got}")]
    InputShape { expected: usize, got: usize },

    #[error("non-finite value in row {row}")]
    NonFinite { row: usize },

    #[error("invalid params: min_samples must be >= 2 (got {min_samples})")]
    InvalidMinSamples { min_samples: usize },

    #[error("invalid params: min_cluster_size must be >= 2 (got {min_cluster_size})")]
    InvalidMinClusterSize { min_cluster_size: usize },
}

/// Reasons a DBCV score cannot be computed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidityError {
    #[error("{labels} labels for {rows} rows")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("need at least 2 non-noise clusters, found {found}")]
    TooFewClusters { found: usize },

    #[error("cluster {label} has {size} member(s); at least 2 are required")]
    ClusterTooSmall { label: i32, size: usize },

    #[error("validity computation produced a non-finite value for cluster {label}")]
    NonFinite { label: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let p = HdbscanParams::default();
        assert_eq!((p.min_samples, p.min_cluster_size), (5, 5));
        assert!(!p.allow_single_cluster);
        assert_eq!(p.core_parallelism, Parallelism::Single);

        let p = HdbscanParams::new(3, 12)
            .with_allow_single_cluster(true)
            .with_parallelism(Parallelism::All);
        assert_eq!((p.min_samples, p.min_cluster_size), (3, 12));
        assert!(p.allow_single_cluster);
        assert_eq!(p.core_parallelism, Parallelism::All);
    }

    #[test]
    fn validate_requires_two() {
        assert!(HdbscanParams::new(2, 2).validate().is_ok());
        assert_eq!(
            HdbscanParams::new(1, 5).validate(),
            Err(DensityError::InvalidMinSamples { min_samples: 1 })
        );
        assert_eq!(
            HdbscanParams::new(5, 0).validate(),
            Err(DensityError::InvalidMinClusterSize { min_cluster_size: 0 })
        );
    }

    #[test]
    fn error_messages() {
        let err = ValidityError::ClusterTooSmall { label: 3, size: 1 };
        assert_eq!(err.to_string(), "cluster 3 has 1 member(s); at least 2 are required");
        let err = DensityError::InputShape { expected: 10, got: 4 };
        assert!(err.to_string().contains("expected 10"));
    }
}
