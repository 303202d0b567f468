//! Sequential model-based minimisation over integer boxes.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TunerError;
use crate::gp::{ExpectedImprovement, GaussianProcess};
use crate::objective::{Objective, PenaltyReason, TrialOutcome};
use crate::space::SearchSpace;

/// One evaluated point, in visit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub params: Vec<i64>,
    pub outcome: TrialOutcome,
}

/// Gaussian-process minimiser.
///
/// The first `n_initial_points` evaluations are uniform random draws; after
/// that each point maximises expected improvement over `n_candidates` random
/// unvisited candidates (or over every unvisited point when the box is that
/// small). No point is evaluated twice, and the search stops early once the
/// box is exhausted. All randomness comes from one seeded `ChaCha8Rng`.
#[derive(Debug, Clone)]
pub struct GpMinimizer {
    pub space: SearchSpace,
    pub n_calls: usize,
    pub n_initial_points: usize,
    pub n_candidates: usize,
    pub xi: f64,
    pub seed: u64,
}

impl GpMinimizer {
    pub fn new(space: SearchSpace, n_calls: usize, seed: u64) -> Self {
        Self {
            space,
            n_calls,
            n_initial_points: 10,
            n_candidates: 2_000,
            xi: 0.01,
            seed,
        }
    }

    pub fn with_n_initial_points(mut self, n: usize) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_xi(mut self, xi: f64) -> Self {
        self.xi = xi;
        self
    }

    /// Evaluate `objective` up to `n_calls` times and return every trial.
    pub fn minimize<O: Objective + ?Sized>(&self, objective: &mut O) -> Result<Vec<Trial>, TunerError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let ei = ExpectedImprovement::new(self.xi)?;
        let cardinality = self.space.cardinality();
        let small_box = cardinality <= self.n_candidates as u64;

        let mut visited: HashSet<Vec<i64>> = HashSet::new();
        let mut trials: Vec<Trial> = Vec::with_capacity(self.n_calls);

        for index in 0..self.n_calls {
            if visited.len() as u64 >= cardinality {
                debug!(trials = trials.len(), "search_space_exhausted");
                break;
            }

            let params = if index < self.n_initial_points {
                self.random_unvisited(&mut rng, &visited, small_box)
            } else {
                self.suggest(&mut rng, &visited, small_box, &trials, &ei)?
            };

            let mut outcome = objective.evaluate(&params);
            if let TrialOutcome::Scored(v) = outcome {
                if !v.is_finite() {
                    outcome = TrialOutcome::Penalized {
                        reason: PenaltyReason::NonFinite,
                        value: objective.penalty(),
                    };
                }
            }
            debug!(trial = index, params = ?params, value = outcome.value(), "trial");

            visited.insert(params.clone());
            trials.push(Trial {
                index,
                params,
                outcome,
            });
        }
        Ok(trials)
    }

    fn unvisited(&self, visited: &HashSet<Vec<i64>>) -> Vec<Vec<i64>> {
        self.space
            .enumerate()
            .into_iter()
            .filter(|p| !visited.contains(p))
            .collect()
    }

    fn random_unvisited(
        &self,
        rng: &mut ChaCha8Rng,
        visited: &HashSet<Vec<i64>>,
        small_box: bool,
    ) -> Vec<i64> {
        if small_box {
            let remaining = self.unvisited(visited);
            if let Some(p) = remaining.choose(rng) {
                return p.clone();
            }
        }
        loop {
            let p = self.space.sample(rng);
            if !visited.contains(&p) {
                return p;
            }
        }
    }

    fn suggest(
        &self,
        rng: &mut ChaCha8Rng,
        visited: &HashSet<Vec<i64>>,
        small_box: bool,
        trials: &[Trial],
        ei: &ExpectedImprovement,
    ) -> Result<Vec<i64>, TunerError> {
        let x: Vec<Vec<f64>> = trials.iter().map(|t| self.space.to_unit(&t.params)).collect();
        let y: Vec<f64> = trials.iter().map(|t| t.outcome.value()).collect();
        let gp = GaussianProcess::fit(&x, &y)?;
        let best = y
            .iter()
            .map(|&v| gp.normalise(v))
            .fold(f64::INFINITY, f64::min);

        let candidates: Vec<Vec<i64>> = if small_box {
            self.unvisited(visited)
        } else {
            let mut seen = HashSet::new();
            (0..self.n_candidates)
                .map(|_| self.space.sample(rng))
                .filter(|p| !visited.contains(p) && seen.insert(p.clone()))
                .collect()
        };

        let mut chosen: Option<(f64, Vec<i64>)> = None;
        for c in candidates {
            let (mean, std) = gp.predict(&self.space.to_unit(&c));
            let score = ei.score(mean, std, best);
            if chosen.as_ref().is_none_or(|(s, _)| score > *s) {
                chosen = Some((score, c));
            }
        }
        match chosen {
            Some((_, c)) => Ok(c),
            None => Ok(self.random_unvisited(rng, visited, small_box)),
        }
    }
}

/// First trial with the smallest value.
pub fn best_trial(trials: &[Trial]) -> Option<&Trial> {
    trials.iter().fold(None, |best: Option<&Trial>, t| match best {
        Some(b) if b.outcome.value() <= t.outcome.value() => Some(b),
        _ => Some(t),
    })
}
