//! Excess-of-mass cluster selection, point labels and membership strengths.

use crate::tree::CondensedTree;

/// Label used for points outside every selected cluster.
pub const NOISE: i32 = -1;

/// Lookup tables over a condensed tree, indexed by point id or by cluster
/// offset (`cluster id - n_points`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TreeIndex {
    pub n_points: usize,
    /// Parent of each cluster; `None` for the root.
    pub cluster_parent: Vec<Option<usize>>,
    /// Child cluster ids of each cluster.
    pub cluster_children: Vec<Vec<usize>>,
    /// Density level at which each cluster appears; 0 for the root.
    pub birth: Vec<f64>,
    /// Largest density level among each cluster's direct children.
    pub death: Vec<f64>,
    /// Cluster each point falls out of and the level at which it does.
    pub point_parent: Vec<usize>,
    pub point_lambda: Vec<f64>,
}

impl TreeIndex {
    pub fn new(tree: &CondensedTree) -> Self {
        let n_points = tree.n_points;
        let n_clusters = tree.cluster_bound() - n_points;
        let mut cluster_parent = vec![None; n_clusters];
        let mut cluster_children = vec![Vec::new(); n_clusters];
        let mut birth = vec![0.0; n_clusters];
        let mut death = vec![0.0f64; n_clusters];
        let mut point_parent = vec![tree.root(); n_points];
        let mut point_lambda = vec![0.0; n_points];

        for row in &tree.rows {
            let p = row.parent - n_points;
            death[p] = death[p].max(row.lambda);
            if row.child_size > 1 {
                let c = row.child - n_points;
                cluster_parent[c] = Some(row.parent);
                cluster_children[p].push(row.child);
                birth[c] = row.lambda;
            } else {
                point_parent[row.child] = row.parent;
                point_lambda[row.child] = row.lambda;
            }
        }

        Self {
            n_points,
            cluster_parent,
            cluster_children,
            birth,
            death,
            point_parent,
            point_lambda,
        }
    }

    pub fn root(&self) -> usize {
        self.n_points
    }

    pub fn n_clusters(&self) -> usize {
        self.birth.len()
    }

    #[inline]
    pub fn offset(&self, cluster: usize) -> usize {
        cluster - self.n_points
    }

    /// Direct child clusters of `cluster`.
    pub fn children(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.cluster_children[self.offset(cluster)].iter().copied()
    }

    /// `cluster` and every cluster below it.
    pub fn descendants(&self, cluster: usize) -> Vec<usize> {
        let mut out = vec![cluster];
        let mut i = 0;
        while i < out.len() {
            let current = out[i];
            out.extend(self.children(current));
            i += 1;
        }
        out
    }
}

/// Stability of every cluster: `Σ (λ_leave − λ_birth) · size` over the rows
/// that leave it.
pub(crate) fn stabilities(tree: &CondensedTree, index: &TreeIndex) -> Vec<f64> {
    let mut stability = vec![0.0; index.n_clusters()];
    for row in &tree.rows {
        let p = index.offset(row.parent);
        stability[p] += (row.lambda - index.birth[p]) * row.child_size as f64;
    }
    stability
}

/// Excess-of-mass selection. Returns selected cluster ids in ascending order.
///
/// Clusters are visited bottom-up; a cluster is kept when it is at least as
/// stable as the best selection beneath it. The root is only a candidate when
/// `allow_single_cluster` is set.
pub(crate) fn select_clusters(
    index: &TreeIndex,
    stability: &[f64],
    allow_single_cluster: bool,
) -> Vec<usize> {
    let n = index.n_clusters();
    let mut stability = stability.to_vec();
    let mut is_cluster = vec![false; n];
    let first = if allow_single_cluster { 0 } else { 1 };
    is_cluster[first..].fill(true);

    for c in (first..n).rev() {
        let id = c + index.n_points;
        let subtree: f64 = index
            .children(id)
            .map(|child| stability[index.offset(child)])
            .sum();
        if subtree > stability[c] {
            is_cluster[c] = false;
            stability[c] = subtree;
        } else {
            for sub in index.descendants(id).into_iter().skip(1) {
                is_cluster[index.offset(sub)] = false;
            }
        }
    }

    (0..n)
        .filter(|&c| is_cluster[c])
        .map(|c| c + index.n_points)
        .collect()
}

/// Label of each point: the position of its nearest selected ancestor in
/// `selected`, or [`NOISE`].
pub(crate) fn label_points(index: &TreeIndex, selected: &[usize]) -> Vec<i32> {
    let mut label_of = vec![NOISE; index.n_clusters()];
    for (label, &cluster) in selected.iter().enumerate() {
        label_of[index.offset(cluster)] = label as i32;
    }
    let root = index.root();
    let root_selected = label_of[0] != NOISE;
    let root_death = index.death[0];

    (0..index.n_points)
        .map(|point| {
            let mut cluster = index.point_parent[point];
            while cluster != root && label_of[index.offset(cluster)] == NOISE {
                cluster = index.cluster_parent[index.offset(cluster)].unwrap_or(root);
            }
            if cluster != root {
                label_of[index.offset(cluster)]
            } else if root_selected && index.point_lambda[point] >= root_death {
                label_of[0]
            } else {
                NOISE
            }
        })
        .collect()
}

/// Membership strength of each labelled point relative to the most
/// persistent point of its cluster. Noise gets 0.
pub(crate) fn membership_probabilities(
    index: &TreeIndex,
    selected: &[usize],
    labels: &[i32],
) -> Vec<f64> {
    labels
        .iter()
        .enumerate()
        .map(|(point, &label)| {
            if label < 0 {
                return 0.0;
            }
            let max_lambda = index.death[index.offset(selected[label as usize])];
            let lambda = index.point_lambda[point];
            if max_lambda == 0.0 || !lambda.is_finite() {
                1.0
            } else {
                lambda.min(max_lambda) / max_lambda
            }
        })
        .collect()
}

/// Map from cluster offset to label for every selected cluster and each of
/// its descendants.
pub(crate) fn descendant_labels(index: &TreeIndex, selected: &[usize]) -> Vec<i32> {
    let mut out = vec![NOISE; index.n_clusters()];
    for (label, &cluster) in selected.iter().enumerate() {
        for sub in index.descendants(cluster) {
            out[index.offset(sub)] = label as i32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::CondensedRow;

    fn row(parent: usize, child: usize, lambda: f64, child_size: usize) -> CondensedRow {
        CondensedRow {
            parent,
            child,
            lambda,
            child_size,
        }
    }

    /// Eight points. Root 8 splits at λ=1 into clusters 9 {0..4} and
    /// 10 {4..8}; cluster 9 splits again at λ=2 into 11 {0, 1} and 12 {2, 3}.
    fn nested_tree(inner_lambda: f64) -> CondensedTree {
        CondensedTree {
            n_points: 8,
            rows: vec![
                row(8, 9, 1.0, 4),
                row(8, 10, 1.0, 4),
                row(9, 11, 2.0, 2),
                row(9, 12, 2.0, 2),
                row(10, 4, 5.0, 1),
                row(10, 5, 5.0, 1),
                row(10, 6, 4.0, 1),
                row(10, 7, 3.0, 1),
                row(11, 0, inner_lambda, 1),
                row(11, 1, inner_lambda, 1),
                row(12, 2, inner_lambda, 1),
                row(12, 3, inner_lambda, 1),
            ],
        }
    }

    #[test]
    fn index_records_parents_and_levels() {
        let tree = nested_tree(3.0);
        let index = TreeIndex::new(&tree);
        assert_eq!(index.n_clusters(), 5);
        assert_eq!(index.cluster_parent, vec![None, Some(8), Some(8), Some(9), Some(9)]);
        assert_eq!(index.birth, vec![0.0, 1.0, 1.0, 2.0, 2.0]);
        assert_eq!(index.death[2], 5.0);
        assert_eq!(index.point_parent[6], 10);
        assert_eq!(index.point_lambda[7], 3.0);
        assert_eq!(index.descendants(9), vec![9, 11, 12]);
    }

    #[test]
    fn stability_sums_persistence() {
        let tree = nested_tree(3.0);
        let index = TreeIndex::new(&tree);
        let s = stabilities(&tree, &index);
        // Cluster 10: (4 + 4 + 3 + 2) = 13.
        assert_eq!(s[2], 13.0);
        // Cluster 9: both children leave at λ=2 with size 2: 2 * (1 * 2).
        assert_eq!(s[1], 4.0);
        // Cluster 11: two points at λ=3, born at 2.
        assert_eq!(s[3], 2.0);
    }

    #[test]
    fn parent_wins_when_children_are_not_more_stable() {
        let tree = nested_tree(3.0);
        let index = TreeIndex::new(&tree);
        let s = stabilities(&tree, &index);
        let selected = select_clusters(&index, &s, false);
        assert_eq!(selected, vec![9, 10]);

        let labels = label_points(&index, &selected);
        assert_eq!(labels, vec![0, 0, 0, 0, 1, 1, 1, 1]);

        let probs = membership_probabilities(&index, &selected, &labels);
        // Cluster 9's deepest direct child leaves at λ=2; points leave later.
        assert_eq!(&probs[..4], &[1.0; 4]);
        assert_eq!(&probs[4..], &[1.0, 1.0, 0.8, 0.6]);
    }

    #[test]
    fn children_win_when_more_stable() {
        let tree = nested_tree(10.0);
        let index = TreeIndex::new(&tree);
        let s = stabilities(&tree, &index);
        // Children: 2 * 8 = 16 each, parent 4.
        let selected = select_clusters(&index, &s, false);
        assert_eq!(selected, vec![10, 11, 12]);
        let labels = label_points(&index, &selected);
        assert_eq!(labels, vec![1, 1, 2, 2, 0, 0, 0, 0]);
        assert_eq!(descendant_labels(&index, &selected), vec![-1, -1, 0, 1, 2]);
    }

    #[test]
    fn root_only_selected_when_allowed() {
        let tree = CondensedTree {
            n_points: 4,
            rows: vec![
                row(4, 0, 1.0, 1),
                row(4, 1, 2.0, 1),
                row(4, 2, 2.0, 1),
                row(4, 3, 2.0, 1),
            ],
        };
        let index = TreeIndex::new(&tree);
        let s = stabilities(&tree, &index);
        assert!(select_clusters(&index, &s, false).is_empty());
        assert!(label_points(&index, &[]).iter().all(|&l| l == NOISE));

        let selected = select_clusters(&index, &s, true);
        assert_eq!(selected, vec![4]);
        assert_eq!(label_points(&index, &selected), vec![NOISE, 0, 0, 0]);
    }
}
