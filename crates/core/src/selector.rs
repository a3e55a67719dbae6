//! Cluster-count selection by silhouette sweep

use crate::distance::Metric;
use crate::matrix::distinct_rows;
use crate::silhouette::silhouette_score;
use crate::strategy::kmeans::{self, KMeansParams};
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Smallest candidate k
pub const MIN_K: usize = 2;
/// Largest candidate k
pub const MAX_K: usize = 10;

/// Sweep range and wall-time budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub min_k: usize,
    pub max_k: usize,
    /// Abort with `Timeout` once a candidate finishes past this budget
    pub budget: Option<Duration>,
    /// Seed for sweep fits whose k-means parameters carry none
    pub seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_k: MIN_K,
            max_k: MAX_K,
            budget: Some(Duration::from_secs(300)),
            seed: None,
        }
    }
}

/// Result of a completed sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub best_k: usize,
    pub best_score: f64,
    /// `(k, silhouette)` for every candidate, in sweep order
    pub scores: Vec<(usize, f64)>,
}

/// Reject inputs on which some candidate k cannot be fitted and scored
///
/// # Errors
/// `InvalidInput` for an empty or inverted range, `DegenerateData` when the
/// data has fewer than 2 distinct rows, no more rows than the largest
/// candidate, or fewer distinct rows than the largest candidate.
pub fn check_sweep_preconditions(data: &Array2<f64>, config: &SweepConfig) -> Result<()> {
    if config.min_k < 2 || config.max_k < config.min_k {
        return Err(AnalysisError::InvalidInput(format!(
            "Sweep range {}..={} must start at 2 or above and not be empty",
            config.min_k, config.max_k
        )));
    }

    let n = data.nrows();
    let distinct = distinct_rows(data);
    if distinct < 2 {
        return Err(AnalysisError::DegenerateData(format!(
            "Cluster-count selection needs at least 2 distinct records, got {distinct}"
        )));
    }
    if config.max_k >= n {
        return Err(AnalysisError::DegenerateData(format!(
            "Cluster-count selection up to k={} needs more than {} records, got {n}",
            config.max_k, config.max_k
        )));
    }
    if distinct < config.max_k {
        return Err(AnalysisError::DegenerateData(format!(
            "Cluster-count selection up to k={} needs as many distinct records, got {distinct}",
            config.max_k
        )));
    }
    Ok(())
}

/// Pick the k in the sweep range with the highest mean silhouette
///
/// Candidates are fitted with k-means using `params` (its own `n_clusters` is
/// ignored). Ties keep the lower k, see [`best_candidate`].
///
/// # Errors
/// Precondition failures from [`check_sweep_preconditions`], any k-means or
/// silhouette failure, or `Timeout` when the budget runs out.
pub fn select_cluster_count(
    data: &Array2<f64>,
    params: &KMeansParams,
    config: &SweepConfig,
) -> Result<SweepOutcome> {
    check_sweep_preconditions(data, config)?;

    let seeded;
    let params = match (params.random_state, config.seed) {
        (None, Some(seed)) => {
            seeded = KMeansParams {
                random_state: Some(seed),
                ..params.clone()
            };
            &seeded
        }
        _ => params,
    };

    let started = Instant::now();
    let mut scores = Vec::with_capacity(config.max_k - config.min_k + 1);

    for k in config.min_k..=config.max_k {
        let fit = kmeans::fit(data, k, params)?;
        let labels: Vec<ClusterLabel> = fit.labels.into_iter().map(ClusterLabel::Cluster).collect();
        let score = silhouette_score(data, &labels, Metric::Euclidean)?;
        debug!("Silhouette for k={}: {:.6}", k, score);

        scores.push((k, score));

        if let Some(budget) = config.budget {
            if started.elapsed() > budget {
                return Err(AnalysisError::Timeout(budget));
            }
        }
    }

    let (best_k, best_score) = best_candidate(&scores).ok_or_else(|| {
        AnalysisError::InvalidInput(format!(
            "Empty sweep range {}..={}",
            config.min_k, config.max_k
        ))
    })?;

    info!(
        "Selected k={} (silhouette {:.4}) in {:.2?}",
        best_k,
        best_score,
        started.elapsed()
    );

    Ok(SweepOutcome {
        best_k,
        best_score,
        scores,
    })
}

/// First `(k, score)` with the highest score; a later candidate must score
/// strictly higher to replace it
fn best_candidate(scores: &[(usize, f64)]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for &(k, score) in scores {
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((k, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::ErrorKind;

    fn seeded() -> KMeansParams {
        KMeansParams {
            random_state: Some(42),
            ..KMeansParams::default()
        }
    }

    /// Four tight groups of four points, far apart
    fn four_blobs() -> Array2<f64> {
        let centers = [(0.0, 0.0), (20.0, 0.0), (0.0, 20.0), (20.0, 20.0)];
        let offsets = [(0.0, 0.0), (0.3, 0.0), (0.0, 0.3), (0.3, 0.3)];
        let mut rows = Vec::new();
        for (cx, cy) in centers {
            for (dx, dy) in offsets {
                rows.extend([cx + dx, cy + dy]);
            }
        }
        Array2::from_shape_vec((16, 2), rows).unwrap()
    }

    #[test]
    fn test_finds_four_blobs() {
        let outcome =
            select_cluster_count(&four_blobs(), &seeded(), &SweepConfig::default()).unwrap();
        assert_eq!(outcome.best_k, 4);
        assert_eq!(outcome.scores.len(), 9);
        assert_eq!(outcome.scores.first().map(|s| s.0), Some(2));
        assert!(outcome.best_score > 0.9);
    }

    #[test]
    fn test_reproducible_with_seed() {
        let a = select_cluster_count(&four_blobs(), &seeded(), &SweepConfig::default()).unwrap();
        let b = select_cluster_count(&four_blobs(), &seeded(), &SweepConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tie_keeps_lower_k() {
        assert_eq!(
            best_candidate(&[(2, 0.5), (3, 0.7), (4, 0.7)]),
            Some((3, 0.7))
        );
        assert_eq!(
            best_candidate(&[(2, 0.6), (3, 0.6), (4, 0.1)]),
            Some((2, 0.6))
        );
        assert_eq!(best_candidate(&[(2, 0.2), (3, 0.9), (4, 0.4)]), Some((3, 0.9)));
    }

    #[test]
    fn test_negative_scores_still_pick_a_k() {
        assert_eq!(best_candidate(&[(2, -0.4), (3, -0.1)]), Some((3, -0.1)));
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn test_best_matches_recorded_scores() {
        let outcome =
            select_cluster_count(&four_blobs(), &seeded(), &SweepConfig::default()).unwrap();
        assert_eq!(
            best_candidate(&outcome.scores),
            Some((outcome.best_k, outcome.best_score))
        );
    }

    #[test]
    fn test_single_candidate_range() {
        let config = SweepConfig {
            min_k: 4,
            max_k: 4,
            budget: None,
            ..SweepConfig::default()
        };
        let outcome = select_cluster_count(&four_blobs(), &seeded(), &config).unwrap();
        assert_eq!(outcome.best_k, 4);
        assert_eq!(outcome.scores.len(), 1);
    }

    #[test]
    fn test_fallback_seed_is_reproducible() {
        let config = SweepConfig {
            seed: Some(9),
            ..SweepConfig::default()
        };
        let unseeded = KMeansParams::default();
        let a = select_cluster_count(&four_blobs(), &unseeded, &config).unwrap();
        let b = select_cluster_count(&four_blobs(), &unseeded, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_records() {
        let data = Array2::from_shape_fn((8, 2), |(i, j)| (i * 3 + j) as f64);
        let err = select_cluster_count(&data, &seeded(), &SweepConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);
    }

    #[test]
    fn test_too_few_distinct_records() {
        let data = Array2::from_shape_fn((30, 1), |(i, _)| (i % 4) as f64);
        let err = check_sweep_preconditions(&data, &SweepConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);

        let constant = Array2::<f64>::zeros((30, 2));
        let err = check_sweep_preconditions(&constant, &SweepConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);
    }

    #[test]
    fn test_zero_budget_times_out() {
        let config = SweepConfig {
            budget: Some(Duration::ZERO),
            ..SweepConfig::default()
        };
        let err = select_cluster_count(&four_blobs(), &seeded(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_invalid_range() {
        let config = SweepConfig {
            min_k: 1,
            ..SweepConfig::default()
        };
        let err = check_sweep_preconditions(&four_blobs(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
