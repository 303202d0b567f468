//! Fit and transform for the manifold reducer.

use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::ann::hnsw_self_knn;
use crate::config::{ManifoldError, ReducerConfig};
use crate::graph::{
    epochs_per_sample, fuzzy_union, membership_strengths, prune_weak_edges, smooth_knn_dist, Edge,
};
use crate::init::{pca_layout, random_layout};
use crate::knn::{exact_query_knn, exact_self_knn, Points};
use crate::layout::{find_ab_params, optimize_layout, LayoutParams};

/// Minimum number of rows a reducer can be fit on.
pub const MIN_FIT_ROWS: usize = 3;

/// A trained projection.
///
/// Only [`ReducerConfig::fit`] creates one, and nothing mutates it afterwards:
/// `transform` borrows it immutably and is free to run any number of times.
#[derive(Debug, Clone)]
pub struct FittedReducer {
    config: ReducerConfig,
    training: Points,
    n_neighbors: usize,
    embedding: Array2<f32>,
    a: f32,
    b: f32,
}

impl ReducerConfig {
    /// Learn a projection of `data` (rows are points).
    pub fn fit(&self, data: ArrayView2<'_, f32>) -> Result<FittedReducer, ManifoldError> {
        self.validate()?;
        let n = data.nrows();
        if n < MIN_FIT_ROWS {
            return Err(ManifoldError::InsufficientData {
                n,
                min: MIN_FIT_ROWS,
            });
        }

        let k = if self.n_neighbors > n {
            warn!(
                n_neighbors = self.n_neighbors,
                rows = n,
                "n_neighbors exceeds row count; clamping"
            );
            n
        } else {
            self.n_neighbors
        };

        let points = Points::prepare(data, self.metric)?;
        let knn = if self.neighbors.should_use_ann(n) {
            hnsw_self_knn(&points, k, self.metric, &self.neighbors)
        } else {
            exact_self_knn(&points, k, self.metric)
        };

        let (sigmas, rhos) = smooth_knn_dist(&knn, k, 1.0);
        let directed = membership_strengths(&knn, &sigmas, &rhos, true);
        let n_epochs = self.fit_epochs(n);
        let edges = prune_weak_edges(fuzzy_union(&directed), n_epochs);
        debug!(rows = n, k, edges = edges.len(), n_epochs, "fuzzy graph built");

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut layout = match pca_layout(&points, self.n_components, &mut rng) {
            Some(layout) => layout,
            None => {
                warn!(rows = n, "rows have no spread; starting from a random layout");
                random_layout(n, self.n_components, &mut rng)
            }
        };

        let (a, b) = find_ab_params(self.spread, self.min_dist);
        let params = LayoutParams {
            a,
            b,
            gamma: self.repulsion_strength,
            initial_alpha: self.learning_rate,
            negative_sample_rate: self.negative_sample_rate,
            n_epochs,
        };
        let rates = epochs_per_sample(&edges);
        optimize_layout(
            &mut layout,
            None,
            self.n_components,
            &edges,
            &rates,
            &params,
            &mut rng,
        );

        let c = self.n_components;
        let embedding = Array2::from_shape_fn((n, c), |(i, j)| layout[i * c + j]);
        info!(
            rows = n,
            input_dim = points.dim,
            n_components = self.n_components,
            metric = ?self.metric,
            "manifold reducer fitted"
        );

        Ok(FittedReducer {
            config: self.clone(),
            training: points,
            n_neighbors: k,
            embedding,
            a,
            b,
        })
    }

    /// Fit on `data` and return the fitted reducer with the layout of `data`.
    pub fn fit_transform(
        &self,
        data: ArrayView2<'_, f32>,
    ) -> Result<(FittedReducer, Array2<f32>), ManifoldError> {
        let fitted = self.fit(data)?;
        let embedding = fitted.embedding.clone();
        Ok((fitted, embedding))
    }
}

impl FittedReducer {
    /// Layout of the rows the reducer was fit on.
    pub fn embedding(&self) -> &Array2<f32> {
        &self.embedding
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    pub fn input_dim(&self) -> usize {
        self.training.dim
    }

    pub fn n_components(&self) -> usize {
        self.config.n_components
    }

    /// Neighbourhood size actually used (after clamping to the row count).
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Curve parameters `(a, b)` of the output similarity.
    pub fn curve_params(&self) -> (f32, f32) {
        (self.a, self.b)
    }

    /// Place new rows into the fitted layout without changing it.
    ///
    /// Each new row starts at the membership-weighted mean of its fitted
    /// neighbours and is then refined against the frozen layout. The seed is
    /// reused on every call so the same input always maps to the same output.
    pub fn transform(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>, ManifoldError> {
        if data.ncols() != self.input_dim() {
            return Err(ManifoldError::InputShape {
                expected: self.input_dim(),
                got: data.ncols(),
            });
        }
        let m = data.nrows();
        let dim = self.n_components();
        if m == 0 {
            return Ok(Array2::zeros((0, dim)));
        }

        let queries = Points::prepare(data, self.config.metric)?;
        let knn = exact_query_knn(&queries, &self.training, self.n_neighbors, self.config.metric);
        let (sigmas, rhos) = smooth_knn_dist(&knn, self.n_neighbors, 0.0);
        let weights = membership_strengths(&knn, &sigmas, &rhos, false);

        let fitted = self
            .embedding
            .as_slice()
            .map(<[f32]>::to_vec)
            .unwrap_or_else(|| self.embedding.iter().copied().collect());
        let mut layout = initial_positions(&weights, &fitted, m, dim);

        let n_epochs = self.config.transform_epochs(self.training.len());
        let edges = prune_weak_edges(weights, n_epochs);
        let rates = epochs_per_sample(&edges);
        let params = LayoutParams {
            a: self.a,
            b: self.b,
            gamma: self.config.repulsion_strength,
            initial_alpha: self.config.learning_rate / 4.0,
            negative_sample_rate: self.config.negative_sample_rate,
            n_epochs,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        optimize_layout(
            &mut layout,
            Some(&fitted),
            dim,
            &edges,
            &rates,
            &params,
            &mut rng,
        );
        debug!(rows = m, n_epochs, "rows placed into fitted layout");

        Ok(Array2::from_shape_fn((m, dim), |(i, j)| layout[i * dim + j]))
    }
}

/// Weighted mean of each new row's fitted neighbours.
///
/// A row whose weights are all zero falls back to the plain mean.
fn initial_positions(weights: &[Edge], fitted: &[f32], m: usize, dim: usize) -> Vec<f32> {
    let mut layout = vec![0.0f32; m * dim];
    let mut totals = vec![0.0f32; m];
    let mut counts = vec![0usize; m];
    for e in weights {
        totals[e.head] += e.weight;
        counts[e.head] += 1;
    }
    for e in weights {
        let share = if totals[e.head] > 0.0 {
            e.weight / totals[e.head]
        } else {
            1.0 / counts[e.head] as f32
        };
        for d in 0..dim {
            layout[e.head * dim + d] += share * fitted[e.tail * dim + d];
        }
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use rand_distr::{Distribution, Normal};

    fn blobs(per_blob: usize, dim: usize, seed: u64) -> Array2<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 0.1).unwrap();
        let mut m = Array2::zeros((per_blob * 3, dim));
        for (i, mut row) in m.rows_mut().into_iter().enumerate() {
            let blob = i / per_blob;
            for (j, v) in row.iter_mut().enumerate() {
                let center = if j == blob { 10.0 } else { 0.0 };
                *v = center + noise.sample(&mut rng);
            }
        }
        m
    }

    fn small_config() -> ReducerConfig {
        ReducerConfig::default()
            .with_n_neighbors(10)
            .with_n_components(2)
            .with_n_epochs(100)
            .with_seed(17)
    }

    fn blob_of(i: usize) -> usize {
        i / 30
    }

    #[test]
    fn fit_keeps_blobs_apart() {
        let data = blobs(30, 8, 1);
        let fitted = small_config().fit(data.view()).unwrap();
        let emb = fitted.embedding();
        assert_eq!(emb.dim(), (90, 2));

        let centroid = |b: usize| {
            let rows: Vec<_> = (0..90).filter(|&i| blob_of(i) == b).collect();
            let x = rows.iter().map(|&i| emb[[i, 0]]).sum::<f32>() / rows.len() as f32;
            let y = rows.iter().map(|&i| emb[[i, 1]]).sum::<f32>() / rows.len() as f32;
            (x, y)
        };
        // Each row sits closer to its own blob's centroid than to any other.
        let centroids: Vec<_> = (0..3).map(centroid).collect();
        for i in 0..90 {
            let d: Vec<f32> = centroids
                .iter()
                .map(|(x, y)| (emb[[i, 0]] - x).hypot(emb[[i, 1]] - y))
                .collect();
            let own = d[blob_of(i)];
            assert!(d.iter().all(|&o| own <= o), "row {i} misplaced");
        }
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let data = blobs(20, 5, 2);
        let cfg = small_config();
        let a = cfg.fit(data.view()).unwrap();
        let b = cfg.fit(data.view()).unwrap();
        assert_eq!(a.embedding(), b.embedding());
    }

    #[test]
    fn transform_is_idempotent_and_lands_near_training_twins() {
        let data = blobs(30, 8, 3);
        let fitted = small_config().fit(data.view()).unwrap();

        let fresh = blobs(30, 8, 4);
        let first = fitted.transform(fresh.view()).unwrap();
        let second = fitted.transform(fresh.view()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.dim(), (90, 2));

        // A new row from blob 0 should be nearer blob 0's fitted rows.
        let emb = fitted.embedding();
        let mean_dist = |row: usize, blob: usize| {
            (0..90)
                .filter(|&i| blob_of(i) == blob)
                .map(|i| (first[[row, 0]] - emb[[i, 0]]).hypot(first[[row, 1]] - emb[[i, 1]]))
                .sum::<f32>()
                / 30.0
        };
        assert!(mean_dist(0, 0) < mean_dist(0, 1));
        assert!(mean_dist(0, 0) < mean_dist(0, 2));
    }

    #[test]
    fn transform_rejects_wrong_width() {
        let data = blobs(10, 4, 5);
        let fitted = small_config().fit(data.view()).unwrap();
        let wrong = Array2::<f32>::zeros((3, 5));
        assert_eq!(
            fitted.transform(wrong.view()),
            Err(ManifoldError::InputShape { expected: 4, got: 5 })
        );
        assert_eq!(fitted.transform(Array2::<f32>::zeros((0, 4)).view()).unwrap().nrows(), 0);
    }

    #[test]
    fn neighbours_are_clamped_to_row_count() {
        let data = blobs(2, 4, 6);
        let fitted = small_config().with_n_neighbors(50).fit(data.view()).unwrap();
        assert_eq!(fitted.n_neighbors(), 6);
        assert!(fitted.embedding().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let data = Array2::<f32>::zeros((2, 4));
        assert_eq!(
            small_config().fit(data.view()).unwrap_err(),
            ManifoldError::InsufficientData { n: 2, min: 3 }
        );
    }

    #[test]
    fn cosine_metric_fits() {
        let data = blobs(15, 6, 7);
        let fitted = small_config()
            .with_metric(Metric::Cosine)
            .with_n_components(3)
            .fit(data.view())
            .unwrap();
        assert_eq!(fitted.embedding().dim(), (45, 3));
        assert_eq!(fitted.input_dim(), 6);
    }
}
