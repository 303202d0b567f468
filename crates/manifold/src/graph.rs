//! Fuzzy neighbour graph construction.
//!
//! Each row's distances are turned into membership strengths using a
//! per-row offset `rho` (distance to the nearest distinct neighbour) and a
//! bandwidth `sigma`, found by bisection so that the memberships of a row sum
//! to `log2(k)`. Directed memberships are then symmetrised with the
//! probabilistic union `a + b - a * b`.

use std::collections::HashMap;

use crate::knn::KnnGraph;

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const BANDWIDTH_ITERATIONS: usize = 64;

/// One weighted, directed edge of the fuzzy graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Edge {
    pub head: usize,
    pub tail: usize,
    pub weight: f32,
}

/// Per-row `(sigma, rho)`.
///
/// `local_connectivity` is the number of neighbours assumed to be fully
/// connected (1.0 while fitting, 0.0 when placing new rows). Column 0 of each
/// row is skipped in the membership sum, matching the fit layout where it
/// holds the row itself.
pub(crate) fn smooth_knn_dist(
    graph: &KnnGraph,
    n_neighbors: usize,
    local_connectivity: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = graph.n_rows();
    let target = (n_neighbors as f64).log2();
    let mean_all = if graph.distances.is_empty() {
        0.0
    } else {
        graph.distances.iter().map(|&d| d as f64).sum::<f64>() / graph.distances.len() as f64
    };

    let mut sigmas = vec![0.0; n];
    let mut rhos = vec![0.0; n];

    for i in 0..n {
        let (_, row) = graph.row(i);
        let row: Vec<f64> = row.iter().map(|&d| d as f64).collect();

        let non_zero: Vec<f64> = row.iter().copied().filter(|&d| d > 0.0).collect();
        let rho = if non_zero.len() as f64 >= local_connectivity {
            let index = local_connectivity.floor() as usize;
            let interpolation = local_connectivity - index as f64;
            if index > 0 {
                let mut rho = non_zero[index - 1];
                if interpolation > SMOOTH_K_TOLERANCE && index < non_zero.len() {
                    rho += interpolation * (non_zero[index] - non_zero[index - 1]);
                }
                rho
            } else {
                interpolation * non_zero.first().copied().unwrap_or(0.0)
            }
        } else {
            non_zero.iter().copied().fold(0.0, f64::max)
        };

        let mut lo = 0.0;
        let mut hi = f64::INFINITY;
        let mut mid = 1.0;
        for _ in 0..BANDWIDTH_ITERATIONS {
            let psum: f64 = row[1..]
                .iter()
                .map(|&d| {
                    let gap = d - rho;
                    if gap > 0.0 {
                        (-gap / mid).exp()
                    } else {
                        1.0
                    }
                })
                .sum();
            if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                break;
            }
            if psum > target {
                hi = mid;
                mid = (lo + hi) / 2.0;
            } else {
                lo = mid;
                if hi == f64::INFINITY {
                    mid *= 2.0;
                } else {
                    mid = (lo + hi) / 2.0;
                }
            }
        }

        let floor = if rho > 0.0 {
            MIN_K_DIST_SCALE * row.iter().sum::<f64>() / row.len() as f64
        } else {
            MIN_K_DIST_SCALE * mean_all
        };
        sigmas[i] = mid.max(floor);
        rhos[i] = rho;
    }

    (sigmas, rhos)
}

/// Directed membership strengths for every `(row, neighbour)` pair.
///
/// With `skip_self` set, an entry pointing back at its own row gets weight 0.
pub(crate) fn membership_strengths(
    graph: &KnnGraph,
    sigmas: &[f64],
    rhos: &[f64],
    skip_self: bool,
) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(graph.indices.len());
    for i in 0..graph.n_rows() {
        let (indices, distances) = graph.row(i);
        for (&j, &d) in indices.iter().zip(distances) {
            let weight = if skip_self && j == i {
                0.0
            } else if (d as f64) - rhos[i] <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-((d as f64) - rhos[i]) / sigmas[i]).exp()
            };
            edges.push(Edge {
                head: i,
                tail: j,
                weight: weight as f32,
            });
        }
    }
    edges
}

/// Symmetrise directed memberships with the fuzzy union `a + b - a * b`.
///
/// The result holds both directions of every undirected edge, sorted by
/// `(head, tail)`, with zero weights dropped.
pub(crate) fn fuzzy_union(directed: &[Edge]) -> Vec<Edge> {
    let lookup: HashMap<(usize, usize), f32> = directed
        .iter()
        .filter(|e| e.weight > 0.0)
        .map(|e| ((e.head, e.tail), e.weight))
        .collect();

    let mut out = Vec::with_capacity(directed.len() * 2);
    for e in directed.iter().filter(|e| e.weight > 0.0) {
        let transpose = lookup.get(&(e.tail, e.head)).copied();
        let b = transpose.unwrap_or(0.0);
        let weight = e.weight + b - e.weight * b;
        out.push(Edge { weight, ..*e });
        if transpose.is_none() {
            out.push(Edge {
                head: e.tail,
                tail: e.head,
                weight,
            });
        }
    }
    out.sort_unstable_by_key(|e| (e.head, e.tail));
    out.dedup_by_key(|e| (e.head, e.tail));
    out
}

/// Drop edges too weak to be sampled even once in `n_epochs`.
pub(crate) fn prune_weak_edges(edges: Vec<Edge>, n_epochs: usize) -> Vec<Edge> {
    let max = edges.iter().map(|e| e.weight).fold(0.0f32, f32::max);
    let threshold = max / n_epochs as f32;
    edges.into_iter().filter(|e| e.weight >= threshold && e.weight > 0.0).collect()
}

/// How many epochs pass between two samples of each edge.
pub(crate) fn epochs_per_sample(edges: &[Edge]) -> Vec<f64> {
    let max = edges.iter().map(|e| e.weight).fold(0.0f32, f32::max) as f64;
    edges.iter().map(|e| max / e.weight as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_graph() -> KnnGraph {
        // Four points on a line at 0, 1, 2.5, 4.5; k = 3 with self first.
        KnnGraph {
            k: 3,
            indices: vec![0, 1, 2, 1, 0, 2, 2, 1, 3, 3, 2, 1],
            distances: vec![0.0, 1.0, 2.5, 0.0, 1.0, 1.5, 0.0, 1.5, 2.0, 0.0, 2.0, 3.5],
        }
    }

    #[test]
    fn rho_is_nearest_distinct_distance() {
        let (_, rhos) = smooth_knn_dist(&toy_graph(), 3, 1.0);
        assert_eq!(rhos, vec![1.0, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn memberships_sum_to_log2_k() {
        let graph = toy_graph();
        let (sigmas, rhos) = smooth_knn_dist(&graph, 3, 1.0);
        let edges = membership_strengths(&graph, &sigmas, &rhos, true);
        let target = 3f64.log2();
        for i in 0..4 {
            let sum: f64 = edges
                .iter()
                .filter(|e| e.head == i && e.tail != i)
                .map(|e| e.weight as f64)
                .sum();
            assert!((sum - target).abs() < 1e-3, "row {i}: {sum}");
        }
        assert!(edges.iter().filter(|e| e.head == e.tail).all(|e| e.weight == 0.0));
    }

    #[test]
    fn zero_connectivity_keeps_rho_at_zero() {
        let (_, rhos) = smooth_knn_dist(&toy_graph(), 3, 0.0);
        assert!(rhos.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn fuzzy_union_is_symmetric() {
        let directed = vec![
            Edge { head: 0, tail: 1, weight: 0.5 },
            Edge { head: 1, tail: 0, weight: 0.5 },
            Edge { head: 1, tail: 2, weight: 1.0 },
            Edge { head: 2, tail: 2, weight: 0.0 },
        ];
        let union = fuzzy_union(&directed);
        assert_eq!(union.len(), 4);
        let w = |h, t| union.iter().find(|e| e.head == h && e.tail == t).unwrap().weight;
        assert!((w(0, 1) - 0.75).abs() < 1e-6);
        assert!((w(1, 0) - 0.75).abs() < 1e-6);
        assert_eq!(w(1, 2), 1.0);
        assert_eq!(w(2, 1), 1.0);
        assert!(union.windows(2).all(|p| (p[0].head, p[0].tail) < (p[1].head, p[1].tail)));
    }

    #[test]
    fn pruning_and_sampling_rates() {
        let edges = vec![
            Edge { head: 0, tail: 1, weight: 1.0 },
            Edge { head: 1, tail: 0, weight: 0.5 },
            Edge { head: 1, tail: 2, weight: 0.001 },
        ];
        let kept = prune_weak_edges(edges, 200);
        assert_eq!(kept.len(), 2);
        assert_eq!(epochs_per_sample(&kept), vec![1.0, 2.0]);
    }
}
