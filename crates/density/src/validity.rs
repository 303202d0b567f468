//! Cluster validity: the cheap MST-based relative validity and full DBCV.

use std::collections::BTreeMap;

use ndarray::ArrayView2;

use crate::config::ValidityError;
use crate::points::{euclidean, mutual_reachability, Points};
use crate::tree::{prim_mst, MstEdge};

/// Separation substitute for clusters with no MST edge to another cluster,
/// as a multiple of the longest MST edge.
const ISLAND_SEPARATION_FACTOR: f64 = 2.0;

/// Relative validity of a labelling over its mutual-reachability MST.
///
/// For each cluster, the density sparseness is the longest MST edge inside
/// it and the density separation is the shortest MST edge to another
/// cluster. The score is `Σ |C_i| · V_i / n` with
/// `V_i = (sep_i − sparse_i) / max(sep_i, sparse_i)`, `n` counting noise.
/// Returns `None` when no point is clustered.
pub(crate) fn relative_validity(mst: &[MstEdge], labels: &[i32]) -> Option<f64> {
    let n_clusters = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0) as usize);
    if n_clusters == 0 {
        return None;
    }
    let mut sizes = vec![0usize; n_clusters];
    for &l in labels.iter().filter(|&&l| l >= 0) {
        sizes[l as usize] += 1;
    }

    let mut sparseness = vec![0.0f64; n_clusters];
    let mut separation = vec![f64::INFINITY; n_clusters];
    let mut min_outlier_sep = f64::INFINITY;
    let mut max_distance = 0.0f64;

    for edge in mst {
        let (a, b) = (labels[edge.from], labels[edge.to]);
        let length = edge.distance;
        max_distance = max_distance.max(length);
        match (a < 0, b < 0) {
            (true, true) => {}
            (true, false) | (false, true) => min_outlier_sep = min_outlier_sep.min(length),
            (false, false) if a == b => {
                sparseness[a as usize] = sparseness[a as usize].max(length);
            }
            (false, false) => {
                separation[a as usize] = separation[a as usize].min(length);
                separation[b as usize] = separation[b as usize].min(length);
            }
        }
    }

    if min_outlier_sep.is_infinite() {
        min_outlier_sep = max_distance;
    }
    let correction = ISLAND_SEPARATION_FACTOR
        * if n_clusters > 1 {
            max_distance
        } else {
            min_outlier_sep
        };

    let total = labels.len() as f64;
    let score = (0..n_clusters)
        .map(|i| {
            let sep = if separation[i].is_infinite() {
                correction
            } else {
                separation[i]
            };
            let denom = sep.max(sparseness[i]);
            let v = if denom > 0.0 {
                (sep - sparseness[i]) / denom
            } else {
                0.0
            };
            sizes[i] as f64 * v / total
        })
        .sum();
    Some(score)
}

/// Members of one cluster with their all-points core distances and the
/// internal vertices of their mutual-reachability MST.
struct ClusterGeometry {
    label: i32,
    points: Points,
    core: Vec<f64>,
    internal: Vec<usize>,
    sparseness: f64,
}

/// All-points core distance of every member: the inverse-distance mean
/// `((Σ_{j≠i} (1/d_ij)^dim) / (n − 1))^(−1/dim)`. Coincident points do not
/// contribute. If no member has a non-zero distance to any other, every core
/// distance is zero.
fn all_points_core_distances(points: &Points) -> Vec<f64> {
    let dim = points.dim.max(1) as f64;
    let n = points.len();
    let sums: Vec<f64> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = euclidean(points.row(i), points.row(j));
                    if d > 0.0 {
                        (1.0 / d).powf(dim)
                    } else {
                        0.0
                    }
                })
                .sum::<f64>()
                / (n - 1) as f64
        })
        .collect();
    if sums.iter().sum::<f64>() == 0.0 {
        return vec![0.0; n];
    }
    sums.into_iter().map(|s| s.powf(-1.0 / dim)).collect()
}

fn geometry(data: &ArrayView2<'_, f32>, label: i32, rows: &[usize]) -> ClusterGeometry {
    let points = Points {
        data: rows.iter().flat_map(|&i| data.row(i).to_vec()).collect(),
        dim: data.ncols(),
    };
    let core = all_points_core_distances(&points);
    let mst = prim_mst(points.len(), |a, b| {
        mutual_reachability(euclidean(points.row(a), points.row(b)), core[a], core[b])
    });

    let mut degree = vec![0usize; points.len()];
    for e in &mst {
        degree[e.from] += 1;
        degree[e.to] += 1;
    }
    let mut is_internal: Vec<bool> = degree.iter().map(|&d| d > 1).collect();
    if !is_internal.contains(&true) {
        is_internal[0] = true;
    }
    let internal: Vec<usize> = (0..points.len()).filter(|&v| is_internal[v]).collect();

    let internal_max = mst
        .iter()
        .filter(|e| is_internal[e.from] && is_internal[e.to])
        .map(|e| e.distance)
        .reduce(f64::max);
    let sparseness = internal_max
        .or_else(|| mst.iter().map(|e| e.distance).reduce(f64::max))
        .unwrap_or(0.0);

    ClusterGeometry {
        label,
        points,
        core,
        internal,
        sparseness,
    }
}

/// Smallest mutual reachability between internal vertices of two clusters.
fn separation(a: &ClusterGeometry, b: &ClusterGeometry) -> f64 {
    let mut best = f64::INFINITY;
    for &i in &a.internal {
        for &j in &b.internal {
            let d = euclidean(a.points.row(i), b.points.row(j));
            best = best.min(mutual_reachability(d, a.core[i], b.core[j]));
        }
    }
    best
}

/// Density-Based Clustering Validation score of a labelling, in `[-1, 1]`.
///
/// Negative labels are noise and are removed before scoring; cluster weights
/// are relative to the number of clustered points. Memory stays linear in
/// the cluster sizes; every distance is recomputed on demand.
pub fn dbcv_score(data: ArrayView2<'_, f32>, labels: &[i32]) -> Result<f64, ValidityError> {
    if data.nrows() != labels.len() {
        return Err(ValidityError::LengthMismatch {
            rows: data.nrows(),
            labels: labels.len(),
        });
    }

    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        if label >= 0 {
            members.entry(label).or_default().push(row);
        }
    }
    if members.len() < 2 {
        return Err(ValidityError::TooFewClusters {
            found: members.len(),
        });
    }
    if let Some((&label, rows)) = members.iter().find(|(_, rows)| rows.len() < 2) {
        return Err(ValidityError::ClusterTooSmall {
            label,
            size: rows.len(),
        });
    }

    let clustered: usize = members.values().map(Vec::len).sum();
    let clusters: Vec<ClusterGeometry> = members
        .into_iter()
        .map(|(label, rows)| geometry(&data, label, &rows))
        .collect();

    let k = clusters.len();
    let mut min_sep = vec![f64::INFINITY; k];
    for i in 0..k {
        for j in (i + 1)..k {
            let sep = separation(&clusters[i], &clusters[j]);
            min_sep[i] = min_sep[i].min(sep);
            min_sep[j] = min_sep[j].min(sep);
        }
    }

    let mut score = 0.0;
    for (cluster, sep) in clusters.iter().zip(min_sep) {
        let v = (sep - cluster.sparseness) / sep.max(cluster.sparseness);
        if !v.is_finite() {
            return Err(ValidityError::NonFinite {
                label: cluster.label,
            });
        }
        score += cluster.points.len() as f64 / clustered as f64 * v;
    }
    Ok(score)
}
