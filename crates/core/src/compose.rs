//! Final result assembly

use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One record's layout position and group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterPoint {
    pub x: f64,
    pub y: f64,
    pub cluster: ClusterLabel,
}

/// Positionally aligned points plus the resolved cluster count
///
/// Serializes as `{"cluster": [...], "bestK": k}`; `bestK` is `null` for
/// density-based runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    #[serde(rename = "cluster")]
    pub points: Vec<ClusterPoint>,
    #[serde(rename = "bestK")]
    pub best_k: Option<usize>,
}

impl ClusterResult {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = ClusterLabel> + '_ {
        self.points.iter().map(|p| p.cluster)
    }

    /// Distinct non-noise labels
    pub fn cluster_count(&self) -> usize {
        self.labels()
            .filter(|l| !l.is_noise())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn noise_count(&self) -> usize {
        self.labels().filter(|l| l.is_noise()).count()
    }
}

/// Zip embedding rows with labels
///
/// # Errors
/// `NumericFailure` when the embedding is not two columns wide or its row count
/// differs from the label count
pub fn compose(
    embedding: &Array2<f64>,
    labels: &[ClusterLabel],
    best_k: Option<usize>,
) -> Result<ClusterResult> {
    if embedding.ncols() != 2 {
        return Err(AnalysisError::NumericFailure(format!(
            "Embedding has {} columns, expected 2",
            embedding.ncols()
        )));
    }
    if embedding.nrows() != labels.len() {
        return Err(AnalysisError::NumericFailure(format!(
            "Embedding has {} rows but {} labels were produced",
            embedding.nrows(),
            labels.len()
        )));
    }

    let points = embedding
        .rows()
        .into_iter()
        .zip(labels)
        .map(|(row, &cluster)| ClusterPoint {
            x: row[0],
            y: row[1],
            cluster,
        })
        .collect();

    Ok(ClusterResult { points, best_k })
}
