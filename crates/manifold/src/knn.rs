//! Exact k-nearest-neighbour search.
//!
//! Rows are searched in parallel with rayon and collected back in row order,
//! so the resulting graph does not depend on the thread count. Ties on
//! distance break on the lower row index.

use ndarray::ArrayView2;
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::config::{ManifoldError, Metric};

/// Row-major point set with a fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Points {
    pub data: Vec<f32>,
    pub dim: usize,
}

impl Points {
    /// Copy `matrix` into a row-major buffer, normalising rows for cosine.
    pub fn prepare(matrix: ArrayView2<'_, f32>, metric: Metric) -> Result<Self, ManifoldError> {
        let dim = matrix.ncols();
        let mut data = Vec::with_capacity(matrix.len());
        for (row_idx, row) in matrix.rows().into_iter().enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(ManifoldError::NonFinite { row: row_idx });
            }
            data.extend(row.iter().copied());
        }
        let mut points = Self { data, dim };
        if metric == Metric::Cosine && dim > 0 {
            points.data.chunks_mut(dim).for_each(l2_normalize_in_place);
        }
        Ok(points)
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
}

/// Scale a row to unit length. Zero rows are left untouched.
pub(crate) fn l2_normalize_in_place(row: &mut [f32]) {
    let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        row.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Distance between two prepared rows.
#[inline]
pub(crate) fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
        // Rows are already unit length (or zero) so the dot product is the cosine.
        Metric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            (1.0 - dot).max(0.0)
        }
    }
}

/// Dense k-nearest-neighbour lists, `k` entries per row.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnGraph {
    pub k: usize,
    pub indices: Vec<usize>,
    pub distances: Vec<f32>,
}

impl KnnGraph {
    pub fn n_rows(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.indices.len() / self.k
        }
    }

    pub fn row(&self, i: usize) -> (&[usize], &[f32]) {
        let span = i * self.k..(i + 1) * self.k;
        (&self.indices[span.clone()], &self.distances[span])
    }

    pub(crate) fn from_rows(k: usize, rows: Vec<Vec<(usize, f32)>>) -> Self {
        let mut indices = Vec::with_capacity(rows.len() * k);
        let mut distances = Vec::with_capacity(rows.len() * k);
        for row in rows {
            debug_assert_eq!(row.len(), k);
            for (idx, dist) in row {
                indices.push(idx);
                distances.push(dist);
            }
        }
        Self {
            k,
            indices,
            distances,
        }
    }
}

#[inline]
pub(crate) fn by_distance_then_index(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// The `k` nearest of `candidates`, sorted.
pub(crate) fn smallest_k(mut candidates: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k, by_distance_then_index);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_distance_then_index);
    candidates
}

/// Neighbour lists of every row against its own point set.
///
/// Each row lists itself first at distance 0, followed by its `k - 1` nearest
/// other rows. Requires `k <= points.len()`.
pub(crate) fn exact_self_knn(points: &Points, k: usize, metric: Metric) -> KnnGraph {
    let n = points.len();
    let rows: Vec<Vec<(usize, f32)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let query = points.row(i);
            let others: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, distance(metric, query, points.row(j))))
                .collect();
            let mut row = Vec::with_capacity(k);
            row.push((i, 0.0));
            row.extend(smallest_k(others, k - 1));
            row
        })
        .collect();
    KnnGraph::from_rows(k, rows)
}

/// Neighbour lists of `queries` against a separate `reference` set.
pub(crate) fn exact_query_knn(
    queries: &Points,
    reference: &Points,
    k: usize,
    metric: Metric,
) -> KnnGraph {
    let rows: Vec<Vec<(usize, f32)>> = (0..queries.len())
        .into_par_iter()
        .map(|i| {
            let query = queries.row(i);
            let all: Vec<(usize, f32)> = (0..reference.len())
                .map(|j| (j, distance(metric, query, reference.row(j))))
                .collect();
            smallest_k(all, k)
        })
        .collect();
    KnnGraph::from_rows(k, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line() -> Points {
        let m = array![[0.0f32, 0.0], [1.0, 0.0], [3.0, 0.0], [6.0, 0.0]];
        Points::prepare(m.view(), Metric::Euclidean).unwrap()
    }

    #[test]
    fn self_knn_puts_self_first() {
        let graph = exact_self_knn(&line(), 3, Metric::Euclidean);
        assert_eq!(graph.n_rows(), 4);
        let (idx, dist) = graph.row(2);
        assert_eq!(idx, &[2, 1, 3]);
        assert_eq!(dist, &[0.0, 2.0, 3.0]);
        let (idx, _) = graph.row(0);
        assert_eq!(idx, &[0, 1, 2]);
    }

    #[test]
    fn ties_break_on_lower_index() {
        let m = array![[0.0f32], [1.0], [-1.0]];
        let points = Points::prepare(m.view(), Metric::Euclidean).unwrap();
        let graph = exact_self_knn(&points, 3, Metric::Euclidean);
        assert_eq!(graph.row(0).0, &[0, 1, 2]);
    }

    #[test]
    fn query_knn_has_no_self_entry() {
        let reference = line();
        let q = array![[2.9f32, 0.0]];
        let queries = Points::prepare(q.view(), Metric::Euclidean).unwrap();
        let graph = exact_query_knn(&queries, &reference, 2, Metric::Euclidean);
        assert_eq!(graph.row(0).0, &[2, 1]);
    }

    #[test]
    fn cosine_prepare_normalises_rows() {
        let m = array![[3.0f32, 4.0], [0.0, 0.0]];
        let points = Points::prepare(m.view(), Metric::Cosine).unwrap();
        assert!((points.row(0)[0] - 0.6).abs() < 1e-6);
        assert_eq!(points.row(1), &[0.0, 0.0]);

        let d = distance(Metric::Cosine, points.row(0), points.row(0));
        assert!(d.abs() < 1e-6);
        assert!((distance(Metric::Cosine, points.row(0), points.row(1)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn non_finite_rows_are_rejected() {
        let m = array![[0.0f32, 1.0], [f32::NAN, 0.0]];
        assert_eq!(
            Points::prepare(m.view(), Metric::Euclidean),
            Err(ManifoldError::NonFinite { row: 1 })
        );
    }
}
