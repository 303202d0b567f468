//! # Strata Sampler
//!
//! Stratified selection of a sample budget over a density clustering.
//!
//! [`sample`] takes the per-row labels and membership probabilities produced
//! by the clusterer and returns row indices into the same dataset:
//!
//! 1. noise rows (`label < 0`) are dropped;
//! 2. inside each cluster, members are filtered against the cluster's mean
//!    and population standard deviation of probability ([`FilterMode`]);
//! 3. the budget is split over the clusters that still have members
//!    ([`InterStrategy`]), capped at each cluster's size and never below one;
//! 4. each cluster is drawn without replacement, weighted by [`IntraBias`],
//!    with an RNG seeded from [`SamplerConfig::seed`].
//!
//! Selected rows are grouped by ascending cluster label unless
//! [`SamplerConfig::shuffle`] is set.
//!
//! ```
//! use sampler::{sample, SampleOutcome, SamplerConfig};
//!
//! let labels = [0, 0, 0, 1, 1, 1, -1];
//! let probs = [0.9, 0.8, 0.7, 1.0, 0.9, 0.6, 0.0];
//! match sample(&labels, &probs, 4, &SamplerConfig::default()).unwrap() {
//!     SampleOutcome::Selected(s) => {
//!         assert!(!s.indices.contains(&6));
//!         assert_eq!(s.indices.len(), s.plan.total());
//!     }
//!     SampleOutcome::Empty(reason) => panic!("unexpected {reason:?}"),
//! }
//! ```

pub mod allocate;
pub mod config;
mod draw;
mod filter;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use crate::allocate::{ClusterBudget, SampleBudgetPlan};
pub use crate::config::{FilterMode, InterStrategy, IntraBias, SampleError, SamplerConfig};

/// Why nothing was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// No row carried a cluster label.
    NoClusters,
    /// Every cluster lost all of its members to the filter.
    FilteredOut,
}

/// Rows picked by [`sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Indices into the rows passed to [`sample`].
    pub indices: Vec<usize>,
    pub plan: SampleBudgetPlan,
    /// Clusters left after filtering.
    pub survivors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleOutcome {
    Selected(Selection),
    Empty(EmptyReason),
}

impl SampleOutcome {
    /// Selected indices, empty for [`SampleOutcome::Empty`].
    pub fn indices(&self) -> &[usize] {
        match self {
            SampleOutcome::Selected(s) => &s.indices,
            SampleOutcome::Empty(_) => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices().is_empty()
    }
}

/// Select about `budget` rows from a clustering.
///
/// `labels` and `probabilities` are parallel per-row slices. Probabilities
/// must be finite and within `[0, 1]`.
pub fn sample(
    labels: &[i32],
    probabilities: &[f64],
    budget: usize,
    cfg: &SamplerConfig,
) -> Result<SampleOutcome, SampleError> {
    if labels.len() != probabilities.len() {
        return Err(SampleError::LengthMismatch {
            labels: labels.len(),
            probabilities: probabilities.len(),
        });
    }
    if budget == 0 {
        return Err(SampleError::ZeroBudget);
    }
    if let Some((row, &value)) = probabilities
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(SampleError::InvalidProbability { row, value });
    }

    let groups = filter::group(labels, probabilities);
    if groups.is_empty() {
        warn!(rows = labels.len(), "sampling found no clustered rows");
        return Ok(SampleOutcome::Empty(EmptyReason::NoClusters));
    }
    let n_groups = groups.len();

    let survivors: Vec<filter::ClusterMembers> = groups
        .into_iter()
        .filter_map(|g| {
            let label = g.label;
            let before = g.len();
            let kept = filter::apply(g, cfg.filter);
            debug!(
                label,
                before,
                after = kept.as_ref().map_or(0, filter::ClusterMembers::len),
                filter = %cfg.filter,
                "cluster_filtered"
            );
            kept
        })
        .collect();
    if survivors.is_empty() {
        warn!(clusters = n_groups, filter = %cfg.filter, "filter removed every cluster member");
        return Ok(SampleOutcome::Empty(EmptyReason::FilteredOut));
    }

    let sizes: Vec<(i32, usize)> = survivors.iter().map(|c| (c.label, c.len())).collect();
    let plan = allocate::plan(&sizes, budget, cfg.inter);
    if plan.exceeds_budget() {
        info!(
            budget,
            allocated = plan.total(),
            strategy = %cfg.inter,
            "allocation exceeds budget"
        );
    }

    let mut indices = Vec::with_capacity(plan.total());
    for (members, share) in survivors.iter().zip(&plan.clusters) {
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let weights: Vec<f64> = members
            .probabilities
            .iter()
            .map(|&p| draw::weight(cfg.intra, p))
            .collect();
        let picked = draw::without_replacement(&mut rng, &weights, share.take)?;
        indices.extend(picked.into_iter().map(|i| members.rows[i]));
    }

    if cfg.shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        indices.shuffle(&mut rng);
    }

    info!(
        budget,
        selected = indices.len(),
        clusters = survivors.len(),
        "sample_done"
    );
    Ok(SampleOutcome::Selected(Selection {
        indices,
        survivors: survivors.len(),
        plan,
    }))
}
