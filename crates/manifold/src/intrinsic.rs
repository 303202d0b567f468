//! Intrinsic dimension from nearest-neighbour distance ratios (TwoNN).
//!
//! For each point the ratio `mu = r2 / r1` of its second to first
//! nearest-neighbour distance is Pareto distributed with shape equal to the
//! manifold dimension, which gives the maximum-likelihood estimate
//! `d = n / sum(ln mu)`.

use ndarray::ArrayView2;
use tracing::debug;

use crate::config::{IntrinsicConfig, ManifoldError, Metric};
use crate::knn::{exact_self_knn, Points};

/// Minimum number of rows for the estimator.
pub const MIN_ROWS: usize = 3;

/// Continuous TwoNN estimate over Euclidean distances.
///
/// Points whose nearest neighbour is an exact duplicate carry no ratio and
/// are skipped. Returns `f64::INFINITY` if every remaining ratio is exactly 1.
pub fn two_nn_dimension(data: ArrayView2<'_, f32>) -> Result<f64, ManifoldError> {
    let n = data.nrows();
    if n < MIN_ROWS {
        return Err(ManifoldError::InsufficientData { n, min: MIN_ROWS });
    }
    let points = Points::prepare(data, Metric::Euclidean)?;
    let graph = exact_self_knn(&points, 3, Metric::Euclidean);

    let mut n_valid = 0usize;
    let mut log_sum = 0.0f64;
    for i in 0..n {
        let (_, dist) = graph.row(i);
        let (r1, r2) = (dist[1] as f64, dist[2] as f64);
        if r1 <= 0.0 {
            continue;
        }
        n_valid += 1;
        log_sum += (r2 / r1).ln();
    }

    if n_valid == 0 {
        return Err(ManifoldError::NoDistinctNeighbors);
    }
    debug!(rows = n, skipped = n - n_valid, "two-nn ratios collected");
    if log_sum <= 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(n_valid as f64 / log_sum)
}

/// Rounded TwoNN estimate clamped to `cfg`'s range.
pub fn estimate_intrinsic_dimension(
    data: ArrayView2<'_, f32>,
    cfg: &IntrinsicConfig,
) -> Result<usize, ManifoldError> {
    cfg.validate()?;
    let raw = two_nn_dimension(data)?;
    let clamped = if raw.is_finite() {
        (raw.round() as usize).clamp(cfg.min_dimension, cfg.max_dimension)
    } else {
        cfg.max_dimension
    };
    debug!(raw, clamped, "intrinsic dimension estimated");
    Ok(clamped)
}
