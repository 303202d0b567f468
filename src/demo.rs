//! Synthetic embedding matrices for demos, benches and smoke tests.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Isotropic Gaussian blobs.
///
/// Blob `b` is centred on `separation` along axis `b % dim` (shifted by a
/// further `separation` for every wrap around the axes), so centres are
/// pairwise at least `separation` apart. Rows are grouped by blob: rows
/// `b * per_blob .. (b + 1) * per_blob` belong to blob `b`, which is also the
/// returned ground-truth label.
pub fn gaussian_blobs(
    blobs: usize,
    per_blob: usize,
    dim: usize,
    spread: f32,
    separation: f32,
    seed: u64,
) -> (Array2<f32>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, spread).ok();
    let dim = dim.max(1);
    let rows = blobs * per_blob;
    let mut data = Array2::zeros((rows, dim));
    let mut truth = Vec::with_capacity(rows);

    for (i, mut row) in data.rows_mut().into_iter().enumerate() {
        let blob = i / per_blob.max(1);
        let axis = blob % dim;
        let lap = (blob / dim) as f32 + 1.0;
        for (j, v) in row.iter_mut().enumerate() {
            let centre = if j == axis { separation * lap } else { 0.0 };
            let jitter = noise.map_or(0.0, |n| n.sample(&mut rng));
            *v = centre + jitter;
        }
        truth.push(blob);
    }
    (data, truth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_and_truth() {
        let (data, truth) = gaussian_blobs(3, 10, 4, 0.1, 20.0, 1);
        assert_eq!(data.dim(), (30, 4));
        assert_eq!(truth.len(), 30);
        assert_eq!(truth[0], 0);
        assert_eq!(truth[29], 2);
        // Blob 1 sits on axis 1.
        let mean: f32 = data.column(1).iter().skip(10).take(10).sum::<f32>() / 10.0;
        assert!((mean - 20.0).abs() < 0.5);
    }

    #[test]
    fn seeded() {
        let (a, _) = gaussian_blobs(2, 5, 3, 0.5, 10.0, 9);
        let (b, _) = gaussian_blobs(2, 5, 3, 0.5, 10.0, 9);
        let (c, _) = gaussian_blobs(2, 5, 3, 0.5, 10.0, 10);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
