//! Mean silhouette coefficient

use crate::distance::Metric;
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Mean silhouette coefficient over all rows
///
/// Noise, when present, is scored as its own group. Rows alone in their group
/// score 0.
///
/// # Errors
/// - `DegenerateData` unless `2 <= groups <= rows - 1`
/// - `NumericFailure` when the score is not finite
pub fn silhouette_score(
    data: &Array2<f64>,
    labels: &[ClusterLabel],
    metric: Metric,
) -> Result<f64> {
    let n = data.nrows();
    if labels.len() != n {
        return Err(AnalysisError::NumericFailure(format!(
            "{} labels for {} rows",
            labels.len(),
            n
        )));
    }

    let mut groups: BTreeMap<ClusterLabel, usize> = BTreeMap::new();
    for &label in labels {
        let next = groups.len();
        groups.entry(label).or_insert(next);
    }
    let n_groups = groups.len();
    if n_groups < 2 || n_groups >= n {
        return Err(AnalysisError::DegenerateData(format!(
            "Silhouette needs between 2 and {} clusters, got {}",
            n.saturating_sub(1),
            n_groups
        )));
    }

    let group_of: Vec<usize> = labels.iter().map(|l| groups[l]).collect();
    let mut sizes = vec![0usize; n_groups];
    for &g in &group_of {
        sizes[g] += 1;
    }

    // Per-row scores are collected in order, then summed sequentially so the
    // result does not depend on how rayon split the work.
    let scores: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = group_of[i];
            if sizes[own] <= 1 {
                return 0.0;
            }
            let mut sums = vec![0.0; n_groups];
            let row = data.row(i);
            for j in 0..n {
                if j != i {
                    sums[group_of[j]] += metric.distance(row, data.row(j));
                }
            }
            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..n_groups)
                .filter(|&g| g != own)
                .map(|g| sums[g] / sizes[g] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .collect();

    let score = scores.iter().sum::<f64>() / n as f64;
    if !score.is_finite() {
        return Err(AnalysisError::NumericFailure(
            "Silhouette score is not finite".to_string(),
        ));
    }
    Ok(score)
}
