//! Initial layout from principal components.
//!
//! The leading principal subspace is found by randomised subspace iteration
//! on the centred data, the projection is scaled so its largest coordinate is
//! 10, and a little Gaussian noise breaks exact ties.

use ndarray::{Array2, Axis};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::knn::Points;

const SUBSPACE_ITERATIONS: usize = 6;
const MAX_COORD: f64 = 10.0;
const NOISE_SCALE: f64 = 1e-4;

/// Row-major `n x n_components` starting layout, or `None` when the rows have
/// no spread to project.
pub(crate) fn pca_layout(
    points: &Points,
    n_components: usize,
    rng: &mut ChaCha8Rng,
) -> Option<Vec<f32>> {
    let n = points.len();
    let dim = points.dim;

    let mut x = Array2::from_shape_fn((n, dim), |(i, j)| points.data[i * dim + j] as f64);
    if let Some(mean) = x.mean_axis(Axis(0)) {
        x -= &mean;
    }

    let mut basis = Array2::from_shape_fn((dim, n_components), |_| {
        let v: f64 = StandardNormal.sample(rng);
        v
    });
    orthonormalize_columns(&mut basis);
    for _ in 0..SUBSPACE_ITERATIONS {
        let projected = x.dot(&basis);
        basis = x.t().dot(&projected);
        orthonormalize_columns(&mut basis);
    }

    let mut coords = x.dot(&basis);
    let max_abs = coords.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if max_abs <= 0.0 {
        return None;
    }
    coords.mapv_inplace(|v| MAX_COORD * v / max_abs);

    let layout = coords
        .iter()
        .map(|&v| {
            let jitter: f64 = StandardNormal.sample(rng);
            (v + NOISE_SCALE * jitter) as f32
        })
        .collect();
    Some(layout)
}

/// Modified Gram-Schmidt. Columns that collapse numerically are zeroed, so a
/// rank-deficient input leaves those output dimensions to the noise term.
fn orthonormalize_columns(m: &mut Array2<f64>) {
    let cols = m.ncols();
    for c in 0..cols {
        let before = m.column(c).dot(&m.column(c)).sqrt();
        for prev in 0..c {
            let dot = m.column(c).dot(&m.column(prev));
            let prev_col = m.column(prev).to_owned();
            m.column_mut(c).scaled_add(-dot, &prev_col);
        }
        let norm = m.column(c).dot(&m.column(c)).sqrt();
        if norm > 1e-9 * before && norm > 0.0 {
            m.column_mut(c).mapv_inplace(|v| v / norm);
        } else {
            m.column_mut(c).fill(0.0);
        }
    }
}

/// Uniform layout in `[-10, 10)`, used when there is nothing to project.
pub(crate) fn random_layout(n: usize, n_components: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
    (0..n * n_components)
        .map(|_| rng.gen_range(-10.0f32..10.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use rand::SeedableRng;

    fn stretched_line() -> Points {
        // 20 points along (1, 1, 0) with a small wobble on the third axis.
        let mut data = Vec::new();
        for i in 0..20 {
            let t = i as f32;
            data.extend_from_slice(&[t, t, if i % 2 == 0 { 0.1 } else { -0.1 }]);
        }
        let m = Array2::from_shape_vec((20, 3), data).unwrap();
        Points::prepare(m.view(), Metric::Euclidean).unwrap()
    }

    #[test]
    fn first_component_follows_the_main_axis() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let layout = pca_layout(&stretched_line(), 1, &mut rng).unwrap();
        assert_eq!(layout.len(), 20);
        let max = layout.iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!((max - 10.0).abs() < 1e-2);
        // Monotone along the line, in one direction or the other.
        let increasing = layout.windows(2).all(|w| w[0] < w[1]);
        let decreasing = layout.windows(2).all(|w| w[0] > w[1]);
        assert!(increasing || decreasing);
    }

    #[test]
    fn extra_components_beyond_rank_stay_small() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let layout = pca_layout(&stretched_line(), 5, &mut rng).unwrap();
        assert_eq!(layout.len(), 100);
        // Columns 3 and 4 have no data direction left and hold only noise.
        for row in layout.chunks(5) {
            assert!(row[3].abs() < 1e-2 && row[4].abs() < 1e-2);
        }
    }

    #[test]
    fn same_seed_same_layout() {
        let a = pca_layout(&stretched_line(), 2, &mut ChaCha8Rng::seed_from_u64(9));
        let b = pca_layout(&stretched_line(), 2, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn identical_rows_have_no_projection() {
        let m = Array2::from_elem((6, 3), 2.0f32);
        let points = Points::prepare(m.view(), Metric::Euclidean).unwrap();
        assert!(pca_layout(&points, 2, &mut ChaCha8Rng::seed_from_u64(0)).is_none());
    }

    #[test]
    fn random_layout_is_bounded() {
        let layout = random_layout(4, 3, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(layout.len(), 12);
        assert!(layout.iter().all(|v| (-10.0..10.0).contains(v)));
    }
}
