//! Point storage, distances and core distances.

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::config::{DensityError, Parallelism};

/// Row-major copy of the fitted points.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Points {
    pub data: Vec<f32>,
    pub dim: usize,
}

impl Points {
    pub fn from_view(matrix: ArrayView2<'_, f32>) -> Result<Self, DensityError> {
        let mut data = Vec::with_capacity(matrix.len());
        for (row_idx, row) in matrix.rows().into_iter().enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(DensityError::NonFinite { row: row_idx });
            }
            data.extend(row.iter().copied());
        }
        Ok(Self {
            data,
            dim: matrix.ncols(),
        })
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Sub-selection of rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.dim);
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            dim: self.dim,
        }
    }
}

#[inline]
pub(crate) fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Distance from `query` to its `k`-th nearest row, counting a zero-distance
/// match as the first (so for a fitted row, the row itself).
pub(crate) fn kth_distance(points: &Points, query: &[f32], k: usize) -> f64 {
    let mut dists: Vec<f64> = (0..points.len())
        .map(|j| euclidean(query, points.row(j)))
        .collect();
    let k = k.clamp(1, dists.len());
    let (_, kth, _) = dists.select_nth_unstable_by(k - 1, f64::total_cmp);
    *kth
}

/// Core distance of every row: distance to its `min_samples`-th neighbour,
/// the row itself included. `min_samples` is capped at the row count.
pub(crate) fn core_distances(points: &Points, min_samples: usize, parallelism: Parallelism) -> Vec<f64> {
    let n = points.len();
    match parallelism {
        Parallelism::All => (0..n)
            .into_par_iter()
            .map(|i| kth_distance(points, points.row(i), min_samples))
            .collect(),
        Parallelism::Single => (0..n)
            .map(|i| kth_distance(points, points.row(i), min_samples))
            .collect(),
    }
}

/// `max(d(a, b), core(a), core(b))`.
#[inline]
pub(crate) fn mutual_reachability(d: f64, core_a: f64, core_b: f64) -> f64 {
    d.max(core_a).max(core_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line() -> Points {
        let m = array![[0.0f32], [1.0], [3.0], [7.0]];
        Points::from_view(m.view()).unwrap()
    }

    #[test]
    fn core_distance_counts_self() {
        let points = line();
        // min_samples = 2: nearest other row.
        assert_eq!(core_distances(&points, 2, Parallelism::Single), vec![1.0, 1.0, 2.0, 4.0]);
        // min_samples = 1: the row itself.
        assert_eq!(core_distances(&points, 1, Parallelism::Single), vec![0.0; 4]);
        // Larger than the row count: farthest row.
        assert_eq!(core_distances(&points, 10, Parallelism::Single), vec![7.0, 6.0, 4.0, 7.0]);
    }

    #[test]
    fn parallel_core_distances_equal_sequential() {
        let m = ndarray::Array2::from_shape_fn((200, 3), |(i, j)| ((i * 31 + j * 17) % 97) as f32);
        let points = Points::from_view(m.view()).unwrap();
        assert_eq!(
            core_distances(&points, 7, Parallelism::Single),
            core_distances(&points, 7, Parallelism::All)
        );
    }

    #[test]
    fn non_finite_rejected() {
        let m = array![[0.0f32, f32::INFINITY]];
        assert_eq!(Points::from_view(m.view()), Err(DensityError::NonFinite { row: 0 }));
    }

    #[test]
    fn mutual_reachability_is_max() {
        assert_eq!(mutual_reachability(1.0, 2.0, 0.5), 2.0);
        assert_eq!(mutual_reachability(3.0, 2.0, 0.5), 3.0);
    }
}
