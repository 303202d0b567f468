//! # Strata Tuner
//!
//! Deterministic Gaussian-process search for density clustering
//! hyperparameters.
//!
//! [`tune`] optimises one of four objectives over a reduced matrix:
//!
//! | Mode        | Searches                               | Objective                     |
//! |-------------|----------------------------------------|-------------------------------|
//! | `stability` | `(min_samples, min_cluster_size)`      | −relative validity            |
//! | `dbcv`      | `(min_samples, min_cluster_size)`      | −DBCV over clustered points   |
//! | `heuristic` | `k`; `min_cluster_size = 5`            | −k-distance elbow sharpness   |
//! | `mix`       | `k`; `min_cluster_size = k`            | −k-distance elbow sharpness   |
//!
//! Trials run strictly one after another with a seeded RNG, so the same data,
//! config and seed always visit the same points in the same order. A trial
//! that cannot be scored is recorded with a penalty and the search goes on.
//!
//! ```
//! use ndarray::Array2;
//! use tuner::{tune, Mode, TuningConfig};
//!
//! let data = Array2::from_shape_fn((60, 2), |(i, j)| {
//!     let c = if i < 30 { 0.0 } else { 15.0 };
//!     c + ((i * 13 + j * 7) % 11) as f32 * 0.1
//! });
//! let cfg = TuningConfig::default()
//!     .with_mode(Mode::Stability)
//!     .with_min_samples(2, 10)
//!     .with_min_cluster_size(5, 20)
//!     .with_n_calls(12);
//! let report = tune(data.view(), &cfg).unwrap();
//! assert_eq!(report.trials.len(), 12);
//! assert!(report.best.min_samples >= 2);
//! ```

pub mod config;
pub mod gp;
pub mod objective;
pub mod optimizer;
pub mod space;

use ndarray::{ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use crate::config::{IntRange, Mode, TunerError, TuningConfig};
pub use crate::objective::{
    ClusterObjective, ElbowObjective, Objective, PenaltyReason, TrialOutcome,
};
pub use crate::optimizer::{best_trial, GpMinimizer, Trial};
pub use crate::space::SearchSpace;

/// `min_cluster_size` paired with the elbow `k` in heuristic mode.
pub const HEURISTIC_MIN_CLUSTER_SIZE: usize = 5;

/// Smallest matrix [`tune`] accepts.
pub const MIN_TUNING_ROWS: usize = 2;

/// A clusterer configuration produced by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperparameterCandidate {
    pub min_samples: usize,
    pub min_cluster_size: usize,
}

/// Outcome of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub mode: Mode,
    pub best: HyperparameterCandidate,
    /// Objective value of the winning trial (lower is better).
    pub best_score: f64,
    pub trials: Vec<Trial>,
    /// Rows used for tuning when the data was subsampled.
    pub subsampled_rows: Option<usize>,
}

impl TuningReport {
    pub fn penalized_trials(&self) -> usize {
        self.trials.iter().filter(|t| t.outcome.is_penalized()).count()
    }
}

/// Search for clusterer hyperparameters on `data`.
///
/// With `subsample = Some(s)` and more than `s` rows, a seeded uniform subset
/// of `s` rows (kept in their original order) is searched instead. The caller
/// is expected to refit on the full data with [`TuningReport::best`].
pub fn tune(data: ArrayView2<'_, f32>, cfg: &TuningConfig) -> Result<TuningReport, TunerError> {
    cfg.validate()?;
    let n = data.nrows();
    if n < MIN_TUNING_ROWS {
        return Err(TunerError::InsufficientData {
            n,
            min: MIN_TUNING_ROWS,
        });
    }

    let (owned, subsampled_rows) = match cfg.subsample {
        Some(s) if n > s => {
            let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
            let mut rows = rand::seq::index::sample(&mut rng, n, s).into_vec();
            rows.sort_unstable();
            (Some(data.select(Axis(0), &rows)), Some(s))
        }
        _ => (None, None),
    };
    let view = owned.as_ref().map_or(data, |m| m.view());

    info!(
        mode = %cfg.mode,
        rows = view.nrows(),
        subsampled = subsampled_rows.is_some(),
        "tuning_start"
    );

    let (trials, best) = if cfg.mode.searches_clusterer() {
        let space = SearchSpace::new(vec![cfg.min_samples, cfg.min_cluster_size]);
        let minimizer = minimizer(space, cfg.n_calls, cfg);
        let mut objective = match cfg.mode {
            Mode::Dbcv => ClusterObjective::dbcv(view),
            _ => ClusterObjective::stability(view),
        };
        let trials = minimizer.minimize(&mut objective)?;
        let best = best_trial(&trials).map(|t| HyperparameterCandidate {
            min_samples: objective::floor_param(t.params[0]),
            min_cluster_size: objective::floor_param(t.params[1]),
        });
        (trials, best)
    } else {
        let space = SearchSpace::new(vec![cfg.elbow_k]);
        let minimizer = minimizer(space, cfg.elbow_calls, cfg);
        let mut objective = ElbowObjective::new(view, cfg.elbow_k.max.max(1) as usize);
        let trials = minimizer.minimize(&mut objective)?;
        let best = best_trial(&trials).map(|t| {
            let k = objective::floor_param(t.params[0]);
            HyperparameterCandidate {
                min_samples: k,
                min_cluster_size: if cfg.mode == Mode::Mix {
                    k
                } else {
                    HEURISTIC_MIN_CLUSTER_SIZE
                },
            }
        });
        (trials, best)
    };

    let best = best.ok_or_else(|| TunerError::InvalidConfig("no trial was evaluated".into()))?;
    let best_score = best_trial(&trials).map_or(f64::INFINITY, |t| t.outcome.value());

    let penalized = trials.iter().filter(|t| t.outcome.is_penalized()).count();
    if penalized == trials.len() {
        warn!(trials = trials.len(), "every tuning trial was penalised");
    }
    info!(
        min_samples = best.min_samples,
        min_cluster_size = best.min_cluster_size,
        best_score,
        trials = trials.len(),
        penalized,
        "tuning_done"
    );

    Ok(TuningReport {
        mode: cfg.mode,
        best,
        best_score,
        trials,
        subsampled_rows,
    })
}

fn minimizer(space: SearchSpace, n_calls: usize, cfg: &TuningConfig) -> GpMinimizer {
    GpMinimizer::new(space, n_calls, cfg.seed)
        .with_n_initial_points(cfg.n_initial_points)
        .with_n_candidates(cfg.n_candidates)
        .with_xi(cfg.xi)
}
