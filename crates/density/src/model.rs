use std::collections::BTreeMap;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DensityError, HdbscanParams};
use crate::points::{core_distances, Points};
use crate::predict::PredictionData;
use crate::select::{
    descendant_labels, label_points, membership_probabilities, select_clusters, stabilities,
    TreeIndex, NOISE,
};
use crate::tree::{condense, mutual_reachability_mst, single_linkage, CondensedTree, MstEdge};
use crate::validity::relative_validity;

/// Smallest input [`HdbscanParams::fit`] accepts.
pub const MIN_FIT_ROWS: usize = 2;

/// Per-point cluster labels and membership strengths, parallel to the input
/// rows. Label `-1` is noise and always has probability 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClusterAssignment {
    pub labels: Vec<i32>,
    pub probabilities: Vec<f64>,
}

impl ClusterAssignment {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct non-noise labels.
    pub fn n_clusters(&self) -> usize {
        self.cluster_sizes().len()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l < 0).count()
    }

    /// Member count per non-noise label, in label order.
    pub fn cluster_sizes(&self) -> BTreeMap<i32, usize> {
        let mut sizes = BTreeMap::new();
        for &label in self.labels.iter().filter(|&&l| l >= 0) {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }
}

/// A clusterer fitted to one matrix. Immutable; prediction borrows it.
#[derive(Debug, Clone)]
pub struct FittedClusterer {
    params: HdbscanParams,
    training: Points,
    mst: Vec<MstEdge>,
    condensed: CondensedTree,
    assignment: ClusterAssignment,
    n_clusters: usize,
    prediction: PredictionData,
}

impl HdbscanParams {
    /// Fit the hierarchy to `data` and extract flat clusters.
    ///
    /// Fails only on invalid parameters, fewer than [`MIN_FIT_ROWS`] rows or
    /// non-finite coordinates. A labelling that is entirely noise is a valid
    /// result.
    pub fn fit(&self, data: ArrayView2<'_, f32>) -> Result<FittedClusterer, DensityError> {
        self.validate()?;
        let n = data.nrows();
        if n < MIN_FIT_ROWS {
            return Err(DensityError::InsufficientData {
                n,
                min: MIN_FIT_ROWS,
            });
        }
        let training = Points::from_view(data)?;

        let core = core_distances(&training, self.min_samples, self.core_parallelism);
        let mst = mutual_reachability_mst(&training, &core);
        let merges = single_linkage(mst.clone(), n);
        let condensed = condense(&merges, self.min_cluster_size);

        let index = TreeIndex::new(&condensed);
        let stability = stabilities(&condensed, &index);
        let selected = select_clusters(&index, &stability, self.allow_single_cluster);
        let labels = label_points(&index, &selected);
        let probabilities = membership_probabilities(&index, &selected, &labels);
        let cluster_labels = descendant_labels(&index, &selected);
        let prediction = PredictionData::new(self.min_samples, core, index, &selected, cluster_labels);

        let assignment = ClusterAssignment {
            labels,
            probabilities,
        };
        let n_clusters = selected.len();
        if n_clusters == 0 {
            debug!(
                rows = n,
                min_samples = self.min_samples,
                min_cluster_size = self.min_cluster_size,
                "hdbscan_all_noise"
            );
        } else {
            debug!(
                rows = n,
                clusters = n_clusters,
                noise = assignment.noise_count(),
                "hdbscan_fit"
            );
        }

        Ok(FittedClusterer {
            params: *self,
            training,
            mst,
            condensed,
            assignment,
            n_clusters,
            prediction,
        })
    }
}

impl FittedClusterer {
    /// Labels and probabilities of the training rows.
    pub fn assignment(&self) -> &ClusterAssignment {
        &self.assignment
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// True when every training row is noise.
    pub fn is_degenerate(&self) -> bool {
        self.n_clusters == 0
    }

    pub fn params(&self) -> &HdbscanParams {
        &self.params
    }

    pub fn min_spanning_tree(&self) -> &[MstEdge] {
        &self.mst
    }

    pub fn condensed_tree(&self) -> &CondensedTree {
        &self.condensed
    }

    /// Relative validity of the training labelling over the MST; `None` when
    /// no cluster was found.
    pub fn quality(&self) -> Option<f64> {
        if self.is_degenerate() {
            return None;
        }
        relative_validity(&self.mst, &self.assignment.labels)
    }

    /// Place new rows into the fitted hierarchy without changing it.
    pub fn predict(&self, data: ArrayView2<'_, f32>) -> Result<ClusterAssignment, DensityError> {
        if data.ncols() != self.training.dim {
            return Err(DensityError::InputShape {
                expected: self.training.dim,
                got: data.ncols(),
            });
        }
        if data.nrows() == 0 {
            return Ok(ClusterAssignment::default());
        }
        let queries = Points::from_view(data)?;
        let (labels, probabilities) = self.prediction.predict(&self.training, &queries);
        debug_assert!(labels
            .iter()
            .zip(&probabilities)
            .all(|(&l, &p)| l != NOISE || p == 0.0));
        Ok(ClusterAssignment {
            labels,
            probabilities,
        })
    }
}
