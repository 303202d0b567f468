//! Minimum spanning tree, single-linkage hierarchy and condensed tree.

use serde::{Deserialize, Serialize};

use crate::points::{euclidean, mutual_reachability, Points};

/// Smallest distance turned into a density level; shorter merges are capped
/// at `1 / LAMBDA_FLOOR_DISTANCE`.
const LAMBDA_FLOOR_DISTANCE: f64 = 1e-12;

/// Edge of the mutual-reachability minimum spanning tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MstEdge {
    pub from: usize,
    pub to: usize,
    pub distance: f64,
}

/// Prim's algorithm over the implicit complete mutual-reachability graph.
pub(crate) fn mutual_reachability_mst(points: &Points, core: &[f64]) -> Vec<MstEdge> {
    prim_mst(points.len(), |i, j| {
        mutual_reachability(euclidean(points.row(i), points.row(j)), core[i], core[j])
    })
}

/// Prim's algorithm over a complete graph on `n` vertices whose edge
/// weights are produced on demand.
///
/// O(n^2) time, O(n) memory. Each edge records the tree vertex it was
/// attached from; ties resolve to the lowest vertex index. Edges are returned
/// in insertion order.
pub(crate) fn prim_mst(n: usize, weight: impl Fn(usize, usize) -> f64) -> Vec<MstEdge> {
    if n < 2 {
        return Vec::new();
    }
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut source = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0usize;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = usize::MAX;
        let mut next_dist = f64::INFINITY;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = weight(current, j);
            if d < best[j] {
                best[j] = d;
                source[j] = current;
            }
            if next == usize::MAX || best[j] < next_dist {
                next_dist = best[j];
                next = j;
            }
        }
        edges.push(MstEdge {
            from: source[next],
            to: next,
            distance: next_dist,
        });
        in_tree[next] = true;
        current = next;
    }
    edges
}

/// One merge of the single-linkage dendrogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    next_label: usize,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        let total = 2 * n - 1;
        Self {
            parent: (0..total).collect(),
            size: (0..total).map(|i| usize::from(i < n)).collect(),
            next_label: n,
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let label = self.next_label;
        self.parent[a] = label;
        self.parent[b] = label;
        self.size[label] = self.size[a] + self.size[b];
        self.next_label += 1;
        label
    }
}

/// Single-linkage dendrogram from MST edges.
///
/// Node ids `0..n` are points; merge `i` creates node `n + i`.
pub(crate) fn single_linkage(mut edges: Vec<MstEdge>, n: usize) -> Vec<Merge> {
    edges.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    let mut uf = UnionFind::new(n);
    let mut merges = Vec::with_capacity(edges.len());
    for edge in edges {
        let a = uf.find(edge.from);
        let b = uf.find(edge.to);
        let size = uf.size[a] + uf.size[b];
        uf.union(a, b);
        merges.push(Merge {
            left: a,
            right: b,
            distance: edge.distance,
            size,
        });
    }
    merges
}

/// One edge of the condensed tree: `child` (a point or a cluster) leaves
/// `parent` at density `lambda`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CondensedRow {
    pub parent: usize,
    pub child: usize,
    pub lambda: f64,
    pub child_size: usize,
}

/// Condensed cluster hierarchy.
///
/// Points keep their ids `0..n_points`; clusters are numbered from
/// `n_points` with the root at `n_points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedTree {
    pub n_points: usize,
    pub rows: Vec<CondensedRow>,
}

impl CondensedTree {
    pub fn root(&self) -> usize {
        self.n_points
    }

    /// Rows whose child is a cluster.
    pub fn cluster_rows(&self) -> impl Iterator<Item = &CondensedRow> {
        self.rows.iter().filter(|r| r.child_size > 1)
    }

    /// Largest cluster id plus one.
    pub fn cluster_bound(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.parent.max(if r.child_size > 1 { r.child } else { 0 }) + 1)
            .max()
            .unwrap_or(self.n_points + 1)
    }
}

#[inline]
fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(LAMBDA_FLOOR_DISTANCE)
}

/// Node ids reachable from `root` in the dendrogram, breadth first.
fn bfs_hierarchy(merges: &[Merge], n_points: usize, root: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut frontier = vec![root];
    while !frontier.is_empty() {
        out.extend_from_slice(&frontier);
        frontier = frontier
            .iter()
            .filter(|&&x| x >= n_points)
            .flat_map(|&x| {
                let m = merges[x - n_points];
                [m.left, m.right]
            })
            .collect();
    }
    out
}

/// Collapse the dendrogram: splits where both sides have at least
/// `min_cluster_size` points create two new clusters, every other split lets
/// the small side fall out of its parent as individual points.
pub(crate) fn condense(merges: &[Merge], min_cluster_size: usize) -> CondensedTree {
    let n_points = merges.len() + 1;
    let root = 2 * merges.len();
    let mut relabel = vec![0usize; root + 1];
    relabel[root] = n_points;
    let mut next_label = n_points + 1;
    let mut ignore = vec![false; root + 1];
    let mut rows = Vec::new();

    let node_size = |node: usize| -> usize {
        if node >= n_points {
            merges[node - n_points].size
        } else {
            1
        }
    };

    for node in bfs_hierarchy(merges, n_points, root) {
        if ignore[node] || node < n_points {
            continue;
        }
        let m = merges[node - n_points];
        let lambda = lambda_of(m.distance);
        let left_count = node_size(m.left);
        let right_count = node_size(m.right);
        let parent = relabel[node];

        let spill = |side: usize, rows: &mut Vec<CondensedRow>, ignore: &mut [bool]| {
            for sub in bfs_hierarchy(merges, n_points, side) {
                if sub < n_points {
                    rows.push(CondensedRow {
                        parent,
                        child: sub,
                        lambda,
                        child_size: 1,
                    });
                }
                ignore[sub] = true;
            }
        };

        match (left_count >= min_cluster_size, right_count >= min_cluster_size) {
            (true, true) => {
                for (side, count) in [(m.left, left_count), (m.right, right_count)] {
                    relabel[side] = next_label;
                    rows.push(CondensedRow {
                        parent,
                        child: next_label,
                        lambda,
                        child_size: count,
                    });
                    next_label += 1;
                }
            }
            (false, false) => {
                spill(m.left, &mut rows, &mut ignore);
                spill(m.right, &mut rows, &mut ignore);
            }
            (false, true) => {
                relabel[m.right] = parent;
                spill(m.left, &mut rows, &mut ignore);
            }
            (true, false) => {
                relabel[m.left] = parent;
                spill(m.right, &mut rows, &mut ignore);
            }
        }
    }

    CondensedTree { n_points, rows }
}
