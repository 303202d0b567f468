use std::collections::BTreeMap;

use crate::config::FilterMode;

/// Members of one cluster, as row indices of the caller's dataset with their
/// membership probabilities.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClusterMembers {
    pub label: i32,
    pub rows: Vec<usize>,
    pub probabilities: Vec<f64>,
}

impl ClusterMembers {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Group non-noise rows by label, ascending.
pub(crate) fn group(labels: &[i32], probabilities: &[f64]) -> Vec<ClusterMembers> {
    let mut groups: BTreeMap<i32, ClusterMembers> = BTreeMap::new();
    for (row, (&label, &p)) in labels.iter().zip(probabilities).enumerate() {
        if label < 0 {
            continue;
        }
        let g = groups.entry(label).or_insert_with(|| ClusterMembers {
            label,
            rows: Vec::new(),
            probabilities: Vec::new(),
        });
        g.rows.push(row);
        g.probabilities.push(p);
    }
    groups.into_values().collect()
}

/// Population mean and standard deviation.
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Members that pass `mode`; `None` when nobody does.
pub(crate) fn apply(cluster: ClusterMembers, mode: FilterMode) -> Option<ClusterMembers> {
    if cluster.rows.is_empty() {
        return None;
    }
    let (mean, std) = mean_std(&cluster.probabilities);
    let keep = |p: f64| match mode {
        FilterMode::AboveMean => p > mean,
        FilterMode::BelowMean => p <= mean,
        FilterMode::AboveMeanStd => p > mean - std,
        FilterMode::None => true,
    };
    let (rows, probabilities): (Vec<usize>, Vec<f64>) = cluster
        .rows
        .iter()
        .zip(&cluster.probabilities)
        .filter(|(_, &p)| keep(p))
        .map(|(&r, &p)| (r, p))
        .unzip();
    if rows.is_empty() {
        return None;
    }
    Some(ClusterMembers {
        label: cluster.label,
        rows,
        probabilities,
    })
}
