//! Low-dimensional layout optimisation.
//!
//! The layout is refined by stochastic gradient descent over the fuzzy graph:
//! every edge is sampled at a rate proportional to its weight and pulls its
//! endpoints together, while randomly drawn non-neighbours push the head away.
//! Output-space similarity is modelled by `1 / (1 + a * d^(2b))`.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::graph::Edge;

const GRADIENT_CLIP: f32 = 4.0;

/// Fit `a` and `b` so that `1 / (1 + a * x^(2b))` tracks the target curve
/// that is flat at 1 up to `min_dist` and then decays as
/// `exp(-(x - min_dist) / spread)`.
///
/// Levenberg-Marquardt over 300 points on `[0, 3 * spread]`.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    let spread = spread as f64;
    let min_dist = min_dist as f64;
    let xs: Vec<f64> = (0..300).map(|i| 3.0 * spread * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let residual_ss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = curve(x, a, b) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut lambda = 1e-3;
    let mut current = residual_ss(a, b);

    for _ in 0..200 {
        // Normal equations J^T J and J^T r for the two parameters.
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            let (da, db) = curve_gradient(x, a, b);
            let r = curve(x, a, b) - y;
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let mut improved = false;
        for _ in 0..20 {
            let m_aa = jaa * (1.0 + lambda);
            let m_bb = jbb * (1.0 + lambda);
            let det = m_aa * m_bb - jab * jab;
            if det.abs() < 1e-300 {
                lambda *= 10.0;
                continue;
            }
            let step_a = -(m_bb * ga - jab * gb) / det;
            let step_b = -(m_aa * gb - jab * ga) / det;
            let (na, nb) = (a + step_a, b + step_b);
            if na > 0.0 && nb > 0.0 {
                let candidate = residual_ss(na, nb);
                if candidate < current {
                    let gain = current - candidate;
                    a = na;
                    b = nb;
                    current = candidate;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = gain > 1e-14;
                    break;
                }
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    (a as f32, b as f32)
}

#[inline]
fn curve(x: f64, a: f64, b: f64) -> f64 {
    1.0 / (1.0 + a * x.powf(2.0 * b))
}

#[inline]
fn curve_gradient(x: f64, a: f64, b: f64) -> (f64, f64) {
    if x <= 0.0 {
        return (0.0, 0.0);
    }
    let u = x.powf(2.0 * b);
    let denom = (1.0 + a * u) * (1.0 + a * u);
    let da = -u / denom;
    let db = -a * u * 2.0 * x.ln() / denom;
    (da, db)
}

/// Hyperparameters of one SGD run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LayoutParams {
    pub a: f32,
    pub b: f32,
    pub gamma: f32,
    pub initial_alpha: f32,
    pub negative_sample_rate: usize,
    pub n_epochs: usize,
}

/// Run SGD over `edges` in place.
///
/// `head` holds the rows being moved, `dim` floats per row. With `tail = None`
/// both endpoints of an edge live in `head` and both move (fitting). With
/// `tail = Some(..)` edge tails index into that fixed embedding and only the
/// head rows move (placing new rows). Negative samples are drawn from the tail
/// side. Single-threaded so a seed pins the result exactly.
pub(crate) fn optimize_layout(
    head: &mut [f32],
    tail: Option<&[f32]>,
    dim: usize,
    edges: &[Edge],
    epochs_per_sample: &[f64],
    params: &LayoutParams,
    rng: &mut ChaCha8Rng,
) {
    let n_vertices = match tail {
        Some(t) => t.len() / dim,
        None => head.len() / dim,
    };
    if n_vertices == 0 || edges.is_empty() {
        return;
    }
    let move_other = tail.is_none();
    let (a, b) = (params.a, params.b);

    let negative_rate = params.negative_sample_rate.max(1) as f64;
    let epochs_per_negative: Vec<f64> =
        epochs_per_sample.iter().map(|e| e / negative_rate).collect();
    let mut next_negative = epochs_per_negative.clone();
    let mut next_sample = epochs_per_sample.to_vec();

    let mut alpha = params.initial_alpha;
    for epoch in 0..params.n_epochs {
        let n = epoch as f64;
        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > n {
                continue;
            }
            let j = edge.head;
            let k = edge.tail;

            let dist_sq = squared_distance(head, tail, dim, j, k);
            let attract = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..dim {
                let other = other_value(head, tail, dim, k, d);
                let grad = (attract * (head[j * dim + d] - other)).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                head[j * dim + d] += grad * alpha;
                if move_other {
                    head[k * dim + d] -= grad * alpha;
                }
            }
            next_sample[e] += epochs_per_sample[e];

            let n_negative = ((n - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_negative {
                let k = rng.gen_range(0..n_vertices);
                let dist_sq = squared_distance(head, tail, dim, j, k);
                let repel = if dist_sq > 0.0 {
                    2.0 * params.gamma * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else if move_other && j == k {
                    continue;
                } else {
                    0.0
                };
                if repel <= 0.0 {
                    continue;
                }
                for d in 0..dim {
                    let other = other_value(head, tail, dim, k, d);
                    let grad = (repel * (head[j * dim + d] - other)).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                    head[j * dim + d] += grad * alpha;
                }
            }
            next_negative[e] += n_negative as f64 * epochs_per_negative[e];
        }
        alpha = params.initial_alpha * (1.0 - epoch as f32 / params.n_epochs as f32);
    }
}

#[inline]
fn other_value(head: &[f32], tail: Option<&[f32]>, dim: usize, k: usize, d: usize) -> f32 {
    match tail {
        Some(t) => t[k * dim + d],
        None => head[k * dim + d],
    }
}

#[inline]
fn squared_distance(head: &[f32], tail: Option<&[f32]>, dim: usize, j: usize, k: usize) -> f32 {
    (0..dim)
        .map(|d| {
            let diff = head[j * dim + d] - other_value(head, tail, dim, k, d);
            diff * diff
        })
        .sum()
}
