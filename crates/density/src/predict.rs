//! Approximate placement of new points into a fitted hierarchy.

use rayon::prelude::*;

use crate::points::{euclidean, mutual_reachability, Points};
use crate::select::{TreeIndex, NOISE};

/// Frozen state needed to place new points.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PredictionData {
    pub min_samples: usize,
    pub core: Vec<f64>,
    pub index: TreeIndex,
    /// Label for each cluster offset; descendants of a selected cluster share
    /// its label.
    pub cluster_labels: Vec<i32>,
    /// Largest density level of the selected cluster each offset maps to.
    pub max_lambdas: Vec<f64>,
}

impl PredictionData {
    pub fn new(
        min_samples: usize,
        core: Vec<f64>,
        index: TreeIndex,
        selected: &[usize],
        cluster_labels: Vec<i32>,
    ) -> Self {
        let mut max_lambdas = vec![0.0; index.n_clusters()];
        for &cluster in selected {
            let death = index.death[index.offset(cluster)];
            for sub in index.descendants(cluster) {
                max_lambdas[index.offset(sub)] = death;
            }
        }
        Self {
            min_samples,
            core,
            index,
            cluster_labels,
            max_lambdas,
        }
    }

    /// Label and membership strength for every query row.
    pub fn predict(&self, training: &Points, queries: &Points) -> (Vec<i32>, Vec<f64>) {
        (0..queries.len())
            .into_par_iter()
            .map(|q| self.place(training, queries.row(q)))
            .unzip()
    }

    fn place(&self, training: &Points, query: &[f32]) -> (i32, f64) {
        let k = (2 * self.min_samples).clamp(1, training.len());
        let neighbors = nearest(training, query, k);
        let core = neighbors[self.min_samples.min(k - 1)].1;

        let mut best = (neighbors[0].0, f64::INFINITY);
        for &(row, d) in &neighbors {
            let mr = mutual_reachability(d, core, self.core[row]);
            if mr < best.1 {
                best = (row, mr);
            }
        }
        let (neighbor, mr) = best;
        let mut lambda = if mr > 0.0 { 1.0 / mr } else { f64::MAX };

        let index = &self.index;
        let mut cluster = index.point_parent[neighbor];
        let row_lambda = index.point_lambda[neighbor];
        if row_lambda <= lambda {
            lambda = row_lambda;
        } else {
            while cluster > index.root() && index.birth[index.offset(cluster)] >= lambda {
                cluster = index.cluster_parent[index.offset(cluster)].unwrap_or(index.root());
            }
        }

        let label = self.cluster_labels[index.offset(cluster)];
        if label == NOISE {
            return (NOISE, 0.0);
        }
        let max_lambda = self.max_lambdas[index.offset(cluster)];
        let probability = if max_lambda > 0.0 {
            lambda.min(max_lambda) / max_lambda
        } else {
            1.0
        };
        (label, probability)
    }
}

/// The `k` nearest training rows to `query`, closest first, ties by row.
fn nearest(training: &Points, query: &[f32], k: usize) -> Vec<(usize, f64)> {
    let mut all: Vec<(usize, f64)> = (0..training.len())
        .map(|j| (j, euclidean(query, training.row(j))))
        .collect();
    let order = |a: &(usize, f64), b: &(usize, f64)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
    if k < all.len() {
        all.select_nth_unstable_by(k - 1, order);
        all.truncate(k);
    }
    all.sort_by(order);
    all
}
