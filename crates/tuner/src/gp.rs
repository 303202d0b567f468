//! Gaussian-process surrogate with a Matérn 5/2 kernel and expected
//! improvement.

use ndarray::{Array1, Array2};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::config::TunerError;

/// Observation noise added to the kernel diagonal, in normalised target units.
pub const NOISE_VARIANCE: f64 = 1e-3;

/// Per-dimension length scales tried when fitting, on the unit box.
pub const LENGTH_SCALE_GRID: [f64; 6] = [0.05, 0.1, 0.2, 0.4, 0.8, 1.6];

/// Matérn ν = 5/2 correlation between two unit-box points.
pub fn matern52(a: &[f64], b: &[f64], length_scales: &[f64]) -> f64 {
    let r2: f64 = a
        .iter()
        .zip(b)
        .zip(length_scales)
        .map(|((x, y), l)| {
            let d = (x - y) / l;
            d * d
        })
        .sum();
    let r = r2.sqrt();
    let s = 5f64.sqrt() * r;
    (1.0 + s + 5.0 * r2 / 3.0) * (-s).exp()
}

/// Lower Cholesky factor of a symmetric matrix, or `None` if it is not
/// positive definite.
pub(crate) fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b` for lower-triangular `L`.
fn forward(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Solve `Lᵀ x = b` for lower-triangular `L`.
fn backward(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Fitted surrogate. Targets are standardised internally; predictions are
/// returned in the same standardised units.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    x: Vec<Vec<f64>>,
    chol: Array2<f64>,
    alpha: Array1<f64>,
    length_scales: Vec<f64>,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

struct Candidate {
    chol: Array2<f64>,
    alpha: Array1<f64>,
    lml: f64,
}

fn condition(x: &[Vec<f64>], y: &Array1<f64>, length_scales: &[f64]) -> Option<Candidate> {
    let n = x.len();
    let mut k = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let v = matern52(&x[i], &x[j], length_scales);
            k[[i, j]] = v;
            k[[j, i]] = v;
        }
        k[[i, i]] += NOISE_VARIANCE;
    }
    let chol = cholesky(&k)?;
    let alpha = backward(&chol, &forward(&chol, y));
    let log_det: f64 = (0..n).map(|i| chol[[i, i]].ln()).sum();
    let lml = -0.5 * y.dot(&alpha) - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
    Some(Candidate { chol, alpha, lml })
}

/// Every combination of grid length scales for `ndim` dimensions.
fn length_scale_grid(ndim: usize) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = vec![Vec::new()];
    for _ in 0..ndim {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                LENGTH_SCALE_GRID.iter().map(move |&l| {
                    let mut p = prefix.clone();
                    p.push(l);
                    p
                })
            })
            .collect();
    }
    out
}

impl GaussianProcess {
    /// Fit to unit-box inputs `x` and raw targets `y`, choosing the length
    /// scales with the highest log marginal likelihood (first wins on ties).
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Result<Self, TunerError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(TunerError::Surrogate(format!(
                "{} inputs for {} targets",
                x.len(),
                y.len()
            )));
        }
        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n;
        let y_std = if var > 0.0 { var.sqrt() } else { 1.0 };
        let y_norm: Array1<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let ndim = x[0].len();
        let mut best: Option<(Vec<f64>, Candidate)> = None;
        for ls in length_scale_grid(ndim) {
            if let Some(c) = condition(x, &y_norm, &ls) {
                if best.as_ref().is_none_or(|(_, b)| c.lml > b.lml) {
                    best = Some((ls, c));
                }
            }
        }
        let (length_scales, c) = best.ok_or_else(|| {
            TunerError::Surrogate("kernel matrix is not positive definite".into())
        })?;

        Ok(Self {
            x: x.to_vec(),
            chol: c.chol,
            alpha: c.alpha,
            length_scales,
            y_mean,
            y_std,
            log_marginal_likelihood: c.lml,
        })
    }

    pub fn length_scales(&self) -> &[f64] {
        &self.length_scales
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    /// Standardise a raw target value.
    pub fn normalise(&self, y: f64) -> f64 {
        (y - self.y_mean) / self.y_std
    }

    /// Posterior mean and standard deviation at `x`, standardised units.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k: Array1<f64> = self
            .x
            .iter()
            .map(|xi| matern52(xi, x, &self.length_scales))
            .collect();
        let mean = k.dot(&self.alpha);
        let v = forward(&self.chol, &k);
        let var = (1.0 - v.dot(&v)).max(0.0);
        (mean, var.sqrt())
    }
}

/// Expected improvement below `best` (minimisation), with margin `xi`.
pub struct ExpectedImprovement {
    normal: Normal,
    xi: f64,
}

impl ExpectedImprovement {
    pub fn new(xi: f64) -> Result<Self, TunerError> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| TunerError::Surrogate(e.to_string()))?;
        Ok(Self { normal, xi })
    }

    pub fn score(&self, mean: f64, std: f64, best: f64) -> f64 {
        let improvement = best - mean - self.xi;
        if std <= 1e-12 {
            return improvement.max(0.0);
        }
        let z = improvement / std;
        improvement * self.normal.cdf(z) + std * self.normal.pdf(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn matern_is_one_at_zero_and_decays() {
        let ls = [0.2, 0.2];
        assert!((matern52(&[0.3, 0.3], &[0.3, 0.3], &ls) - 1.0).abs() < 1e-12);
        let near = matern52(&[0.3, 0.3], &[0.35, 0.3], &ls);
        let far = matern52(&[0.3, 0.3], &[0.9, 0.3], &ls);
        assert!(near > far && far > 0.0 && near < 1.0);
    }

    #[test]
    fn cholesky_reconstructs() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 2.0, 0.5], [0.6, 0.5, 3.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
        assert!(cholesky(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
    }

    #[test]
    fn triangular_solves() {
        let l = array![[2.0, 0.0], [1.0, 3.0]];
        let b = array![4.0, 11.0];
        assert_eq!(forward(&l, &b), array![2.0, 3.0]);
        // Lᵀ = [[2, 1], [0, 3]]; x = [1, 2] gives [4, 6].
        assert_eq!(backward(&l, &array![4.0, 6.0]), array![1.0, 2.0]);
    }

    #[test]
    fn gp_interpolates_observations() {
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64 / 7.0]).collect();
        let y: Vec<f64> = x.iter().map(|p| (p[0] * 6.0).sin()).collect();
        let gp = GaussianProcess::fit(&x, &y).unwrap();
        for (p, &t) in x.iter().zip(&y) {
            let (m, s) = gp.predict(p);
            assert!((m - gp.normalise(t)).abs() < 0.1, "mean {m} target {}", gp.normalise(t));
            assert!(s < 0.1);
        }
        // Uncertainty grows away from data.
        let (_, s_far) = gp.predict(&[10.0]);
        assert!(s_far > 0.9);
    }

    #[test]
    fn constant_targets_do_not_break_fit() {
        let x = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.5, 0.2]];
        let gp = GaussianProcess::fit(&x, &[1.0, 1.0, 1.0]).unwrap();
        let (m, _) = gp.predict(&[0.5, 0.5]);
        assert!(m.abs() < 1e-9);
    }

    #[test]
    fn expected_improvement_prefers_low_mean_and_high_spread() {
        let ei = ExpectedImprovement::new(0.01).unwrap();
        let low = ei.score(-1.0, 0.1, 0.0);
        let high = ei.score(1.0, 0.1, 0.0);
        assert!(low > high);
        assert!(ei.score(0.0, 1.0, 0.0) > ei.score(0.0, 0.1, 0.0));
        assert_eq!(ei.score(1.0, 0.0, 0.0), 0.0);
    }
}
