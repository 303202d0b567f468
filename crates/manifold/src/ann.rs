//! Approximate neighbour graph using HNSW.
//!
//! Used only while fitting, and only when [`NeighborConfig::should_use_ann`]
//! says the dataset is large enough. The index is built with parallel
//! insertion and dropped once the graph has been extracted; new rows passed to
//! `transform` are matched by exact search against the stored fit data.
//!
//! ## Trade-offs
//!
//! - **Speed**: sub-quadratic graph construction for large fits
//! - **Recall**: typically 95-99% of the exact neighbours
//! - **Determinism**: insertion order across threads varies between runs, so
//!   the graph (and therefore the layout) may differ slightly

use hnsw_rs::prelude::*;
use rayon::prelude::*;
use tracing::debug;

use crate::config::{Metric, NeighborConfig};
use crate::knn::{by_distance_then_index, distance, smallest_k, KnnGraph, Points};

/// Build an HNSW index over `points` and query every row for `k` neighbours.
///
/// Rows keep the same shape as the exact graph: self first at distance 0,
/// then `k - 1` others. Rows where the index returns too few candidates are
/// completed by exact search.
pub(crate) fn hnsw_self_knn(
    points: &Points,
    k: usize,
    metric: Metric,
    cfg: &NeighborConfig,
) -> KnnGraph {
    let rows = match metric {
        Metric::Cosine => query_all(points, k, metric, cfg, DistCosine {}),
        Metric::Euclidean => query_all(points, k, metric, cfg, DistL2 {}),
    };
    KnnGraph::from_rows(k, rows)
}

fn query_all<D>(
    points: &Points,
    k: usize,
    metric: Metric,
    cfg: &NeighborConfig,
    dist: D,
) -> Vec<Vec<(usize, f32)>>
where
    D: Distance<f32> + Send + Sync,
{
    let nb_elem = points.len();
    let nb_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);
    let hnsw = Hnsw::<f32, D>::new(cfg.m, nb_elem, nb_layer, cfg.ef_construction, dist);

    let rows: Vec<Vec<f32>> = points.data.chunks(points.dim).map(<[f32]>::to_vec).collect();
    let data_for_insertion: Vec<(&Vec<f32>, usize)> =
        rows.iter().enumerate().map(|(idx, vec)| (vec, idx)).collect();
    hnsw.parallel_insert(&data_for_insertion);

    // Ask for one extra so the query row itself can be discarded.
    let ef = cfg.ef_search.max(k + 1);
    let searched: Vec<(Vec<(usize, f32)>, bool)> = (0..nb_elem)
        .into_par_iter()
        .map(|i| {
            let found: Vec<Neighbour> = hnsw.search(&rows[i], k + 1, ef);
            let mut others: Vec<(usize, f32)> = found
                .into_iter()
                .map(|neighbour| neighbour.get_origin_id())
                .filter(|&j| j != i && j < nb_elem)
                .map(|j| (j, distance(metric, points.row(i), points.row(j))))
                .collect();
            others.sort_unstable_by(by_distance_then_index);
            others.dedup_by_key(|entry| entry.0);
            let short = others.len() < k - 1;
            if short {
                others = exact_row(points, i, k, metric);
            }
            others.truncate(k - 1);
            let mut row = Vec::with_capacity(k);
            row.push((i, 0.0));
            row.extend(others);
            (row, short)
        })
        .collect();

    let fallbacks = searched.iter().filter(|(_, short)| *short).count();
    debug!(rows = nb_elem, k, fallbacks, "hnsw neighbour graph built");
    searched.into_iter().map(|(row, _)| row).collect()
}

fn exact_row(points: &Points, i: usize, k: usize, metric: Metric) -> Vec<(usize, f32)> {
    let query = points.row(i);
    let others = (0..points.len())
        .filter(|&j| j != i)
        .map(|j| (j, distance(metric, query, points.row(j))))
        .collect();
    smallest_k(others, k - 1)
}
