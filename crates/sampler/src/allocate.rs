use serde::{Deserialize, Serialize};

use crate::config::InterStrategy;

/// Budget decision for one surviving cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBudget {
    pub label: i32,
    /// Members left after filtering.
    pub available: usize,
    /// Share assigned by the inter-cluster strategy, before capping.
    pub requested: usize,
    /// Members actually drawn: `requested` capped at `available`, at least 1.
    pub take: usize,
}

/// Per-cluster allocation of a sampling budget.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleBudgetPlan {
    pub budget: usize,
    pub clusters: Vec<ClusterBudget>,
}

impl SampleBudgetPlan {
    /// Rows the plan draws in total. May exceed `budget` under equal
    /// allocation or rounding.
    pub fn total(&self) -> usize {
        self.clusters.iter().map(|c| c.take).sum()
    }

    pub fn exceeds_budget(&self) -> bool {
        self.total() > self.budget
    }
}

/// Split `budget` over clusters of the given sizes (`(label, available)`).
pub(crate) fn plan(sizes: &[(i32, usize)], budget: usize, strategy: InterStrategy) -> SampleBudgetPlan {
    let total: usize = sizes.iter().map(|&(_, n)| n).sum();
    let k = sizes.len();
    let clusters = sizes
        .iter()
        .map(|&(label, available)| {
            let requested = match strategy {
                InterStrategy::Equal => budget.div_ceil(k),
                InterStrategy::DirectProportion => {
                    (available as f64 / total as f64 * budget as f64).round_ties_even() as usize
                }
            };
            ClusterBudget {
                label,
                available,
                requested,
                take: requested.min(available).max(1),
            }
        })
        .collect();
    SampleBudgetPlan { budget, clusters }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn takes(p: &SampleBudgetPlan) -> Vec<usize> {
        p.clusters.iter().map(|c| c.take).collect()
    }

    #[test]
    fn equal_split_rounds_up_for_every_cluster() {
        let p = plan(&[(0, 50), (1, 50), (2, 50)], 10, InterStrategy::Equal);
        assert_eq!(takes(&p), vec![4, 4, 4]);
        assert_eq!(p.total(), 12);
        assert!(p.exceeds_budget());
    }

    #[test]
    fn proportional_split_follows_cluster_size() {
        let p = plan(&[(0, 60), (1, 30), (2, 10)], 20, InterStrategy::DirectProportion);
        assert_eq!(takes(&p), vec![12, 6, 2]);
        assert!(!p.exceeds_budget());
    }

    #[test]
    fn proportional_rounding_ties_to_even() {
        // Shares are exactly 2.5 and 1.5.
        let p = plan(&[(0, 5), (1, 3)], 4, InterStrategy::DirectProportion);
        assert_eq!(takes(&p), vec![2, 2]);
        // 0.25 * 10 = 2.5 rounds down, 0.75 * 10 = 7.5 rounds up.
        let p = plan(&[(0, 25), (1, 75)], 10, InterStrategy::DirectProportion);
        assert_eq!(takes(&p), vec![2, 8]);
    }

    #[test]
    fn takes_are_capped_and_never_zero() {
        let p = plan(&[(0, 3), (1, 1000)], 100, InterStrategy::Equal);
        assert_eq!(p.clusters[0].requested, 50);
        assert_eq!(p.clusters[0].take, 3);

        let p = plan(&[(0, 1), (1, 999)], 10, InterStrategy::DirectProportion);
        assert_eq!(p.clusters[0].requested, 0);
        assert_eq!(p.clusters[0].take, 1);
    }
}
