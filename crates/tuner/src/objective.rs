//! Objectives scored by the search. Lower is better.

use density::{dbcv_score, HdbscanParams, Parallelism};
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Value assigned to a trial that could not be scored.
pub const DEFAULT_PENALTY: f64 = 1.0;

/// Why a trial was not scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyReason {
    /// The clusterer labelled every point as noise.
    NoClusters,
    /// `min_samples > min_cluster_size`; rejected before fitting.
    InvalidPair,
    /// Fewer than two clusters; DBCV is undefined.
    TooFewClusters,
    /// The validity computation failed.
    Validity,
    /// The k-distance curve has too few points for an elbow.
    DegenerateCurve,
    /// The objective produced NaN or an infinity.
    NonFinite,
    /// The clusterer rejected the data.
    FitFailed,
}

/// Result of one objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Scored(f64),
    Penalized { reason: PenaltyReason, value: f64 },
}

impl TrialOutcome {
    /// The number the optimiser minimises.
    pub fn value(&self) -> f64 {
        match *self {
            TrialOutcome::Scored(v) => v,
            TrialOutcome::Penalized { value, .. } => value,
        }
    }

    pub fn is_penalized(&self) -> bool {
        matches!(self, TrialOutcome::Penalized { .. })
    }
}

/// Black-box function over integer points.
///
/// Implementations must be deterministic for a given point; the search
/// evaluates strictly sequentially.
pub trait Objective {
    fn evaluate(&mut self, params: &[i64]) -> TrialOutcome;

    /// Value recorded for a trial that cannot be scored.
    fn penalty(&self) -> f64 {
        DEFAULT_PENALTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Score {
    Stability,
    Dbcv,
}

/// Clusterer quality over `(min_samples, min_cluster_size)` candidates.
///
/// Every fit runs with single-threaded core distances so objective values do
/// not depend on the rayon pool.
pub struct ClusterObjective<'a> {
    data: ArrayView2<'a, f32>,
    score: Score,
    fits: usize,
}

impl<'a> ClusterObjective<'a> {
    /// Negative relative validity; no clusters is penalised.
    pub fn stability(data: ArrayView2<'a, f32>) -> Self {
        Self {
            data,
            score: Score::Stability,
            fits: 0,
        }
    }

    /// Negative DBCV over the clustered points.
    pub fn dbcv(data: ArrayView2<'a, f32>) -> Self {
        Self {
            data,
            score: Score::Dbcv,
            fits: 0,
        }
    }

    /// Number of clusterer fits performed so far.
    pub fn fits(&self) -> usize {
        self.fits
    }

    fn penalized(&self, reason: PenaltyReason) -> TrialOutcome {
        TrialOutcome::Penalized {
            reason,
            value: self.penalty(),
        }
    }
}

/// Candidate values below 2 are raised to 2.
pub fn floor_param(v: i64) -> usize {
    v.max(2) as usize
}

impl Objective for ClusterObjective<'_> {
    fn evaluate(&mut self, params: &[i64]) -> TrialOutcome {
        let min_samples = floor_param(params[0]);
        let min_cluster_size = floor_param(params[1]);

        if self.score == Score::Dbcv && min_samples > min_cluster_size {
            return self.penalized(PenaltyReason::InvalidPair);
        }

        let hdbscan = HdbscanParams::new(min_samples, min_cluster_size)
            .with_parallelism(Parallelism::Single);
        self.fits += 1;
        let fitted = match hdbscan.fit(self.data) {
            Ok(f) => f,
            Err(err) => {
                debug!(error = %err, min_samples, min_cluster_size, "trial_fit_failed");
                return self.penalized(PenaltyReason::FitFailed);
            }
        };

        match self.score {
            Score::Stability => match fitted.quality() {
                Some(q) => TrialOutcome::Scored(-q),
                None => self.penalized(PenaltyReason::NoClusters),
            },
            Score::Dbcv => {
                if fitted.n_clusters() < 2 {
                    return self.penalized(PenaltyReason::TooFewClusters);
                }
                match dbcv_score(self.data, &fitted.assignment().labels) {
                    Ok(v) if v.is_finite() => TrialOutcome::Scored(-v),
                    Ok(_) => self.penalized(PenaltyReason::Validity),
                    Err(err) => {
                        debug!(error = %err, min_samples, min_cluster_size, "trial_validity_failed");
                        self.penalized(PenaltyReason::Validity)
                    }
                }
            }
        }
    }
}

/// Fraction of the sorted k-distance curve treated as the plateau.
const PLATEAU_FRACTION: f64 = 0.8;
/// Start of the cliff segment as a fraction of the curve.
const CLIFF_FRACTION: f64 = 0.9;

/// Negative elbow sharpness of the sorted k-distance curve, over `k`.
///
/// Each row's distances to its nearest `max_k` other rows are computed once
/// up front.
pub struct ElbowObjective {
    /// Row-major `n × max_k` ascending neighbour distances, self excluded.
    neighbors: Vec<f64>,
    max_k: usize,
    n: usize,
}

impl ElbowObjective {
    pub fn new(data: ArrayView2<'_, f32>, max_k: usize) -> Self {
        let n = data.nrows();
        let max_k = max_k.min(n.saturating_sub(1));
        let rows: Vec<Vec<f32>> = data.rows().into_iter().map(|r| r.to_vec()).collect();
        let neighbors: Vec<f64> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let mut d: Vec<f64> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| euclidean(&rows[i], &rows[j]))
                    .collect();
                if max_k > 0 && max_k < d.len() {
                    d.select_nth_unstable_by(max_k - 1, f64::total_cmp);
                    d.truncate(max_k);
                }
                d.sort_by(f64::total_cmp);
                d.truncate(max_k);
                d
            })
            .collect();
        Self {
            neighbors,
            max_k,
            n,
        }
    }

    /// Ascending distances of every row to its `k`-th nearest other row.
    pub fn k_distances(&self, k: usize) -> Option<Vec<f64>> {
        if k == 0 || k > self.max_k {
            return None;
        }
        let mut d: Vec<f64> = (0..self.n)
            .map(|i| self.neighbors[i * self.max_k + k - 1])
            .collect();
        d.sort_by(f64::total_cmp);
        Some(d)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Least-squares slope of `y` against `x0, x0 + 1, ...`.
fn slope(x0: usize, y: &[f64]) -> Option<f64> {
    if y.len() < 2 {
        return None;
    }
    let n = y.len() as f64;
    let x_mean = x0 as f64 + (n - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / n;
    let (num, den) = y
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &v)| {
            let dx = (x0 + i) as f64 - x_mean;
            (num + dx * (v - y_mean), den + dx * dx)
        });
    Some(num / den)
}

/// Cliff slope minus plateau slope of a sorted k-distance curve.
pub fn elbow_sharpness(k_distances: &[f64]) -> Option<f64> {
    let n = k_distances.len();
    let plateau_end = (n as f64 * PLATEAU_FRACTION) as usize;
    let cliff_start = (n as f64 * CLIFF_FRACTION) as usize;
    let plateau = slope(0, &k_distances[..plateau_end])?;
    let cliff = slope(cliff_start, &k_distances[cliff_start..])?;
    Some(cliff - plateau)
}

impl Objective for ElbowObjective {
    fn evaluate(&mut self, params: &[i64]) -> TrialOutcome {
        let k = params[0].max(1) as usize;
        let sharpness = self.k_distances(k).and_then(|d| elbow_sharpness(&d));
        match sharpness {
            Some(s) => TrialOutcome::Scored(-s),
            None => TrialOutcome::Penalized {
                reason: PenaltyReason::DegenerateCurve,
                value: self.penalty(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn blobs() -> Array2<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let noise = Normal::new(0.0f32, 0.2).unwrap();
        Array2::from_shape_fn((90, 2), |(i, j)| {
            let c = (i / 30) as f32 * 8.0;
            (if j == 0 { c } else { -c }) + noise.sample(&mut rng)
        })
    }

    #[test]
    fn dbcv_rejects_invalid_pair_without_fitting() {
        let data = blobs();
        let mut obj = ClusterObjective::dbcv(data.view());
        let out = obj.evaluate(&[20, 10]);
        assert_eq!(
            out,
            TrialOutcome::Penalized {
                reason: PenaltyReason::InvalidPair,
                value: 1.0
            }
        );
        assert_eq!(obj.fits(), 0);
    }

    #[test]
    fn dbcv_scores_good_params_negative() {
        let data = blobs();
        let mut obj = ClusterObjective::dbcv(data.view());
        let out = obj.evaluate(&[5, 10]);
        assert_eq!(obj.fits(), 1);
        match out {
            TrialOutcome::Scored(v) => assert!(v < -0.5, "value {v}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stability_penalises_all_noise() {
        let data = blobs();
        let mut obj = ClusterObjective::stability(data.view());
        let out = obj.evaluate(&[5, 200]);
        assert_eq!(
            out,
            TrialOutcome::Penalized {
                reason: PenaltyReason::NoClusters,
                value: 1.0
            }
        );
        assert!(obj.evaluate(&[5, 10]).value() < 0.0);
        assert_eq!(obj.fits(), 2);
    }

    #[test]
    fn dbcv_penalises_single_cluster() {
        let data = blobs();
        let mut obj = ClusterObjective::dbcv(data.view());
        // Too large for three clusters of 30; at most one survives.
        let out = obj.evaluate(&[5, 45]);
        assert!(out.is_penalized());
        assert_eq!(out.value(), 1.0);
    }

    #[test]
    fn params_floor_at_two() {
        assert_eq!(floor_param(-3), 2);
        assert_eq!(floor_param(1), 2);
        assert_eq!(floor_param(7), 7);
    }

    #[test]
    fn slope_matches_closed_form() {
        assert_eq!(slope(0, &[1.0, 3.0, 5.0]), Some(2.0));
        assert_eq!(slope(10, &[4.0, 4.0]), Some(0.0));
        assert_eq!(slope(0, &[1.0]), None);
    }

    #[test]
    fn sharp_elbow_beats_linear_curve() {
        let linear: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let elbow: Vec<f64> = (0..100)
            .map(|i| if i < 90 { i as f64 * 0.01 } else { 1.0 + (i - 89) as f64 * 5.0 })
            .collect();
        let flat = elbow_sharpness(&linear).unwrap();
        let sharp = elbow_sharpness(&elbow).unwrap();
        assert!(flat.abs() < 1e-9);
        assert!(sharp > 4.0);
    }

    #[test]
    fn elbow_objective_scores_and_rejects() {
        let data = blobs();
        let mut obj = ElbowObjective::new(data.view(), 100);
        let d = obj.k_distances(5).unwrap();
        assert_eq!(d.len(), 90);
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
        assert!(matches!(obj.evaluate(&[5]), TrialOutcome::Scored(_)));
        // Only 89 other rows exist.
        assert!(obj.evaluate(&[95]).is_penalized());
    }
}
