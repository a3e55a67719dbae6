//! Two-dimensional layout of the normalized features
//!
//! A UMAP-style reducer: a fuzzy simplicial set is built from each row's
//! nearest neighbours, then a 2-D layout is optimized by stochastic gradient
//! descent with negative sampling. All randomness comes from one seeded
//! generator and the optimization runs sequentially, so identical input gives
//! an identical layout.

use crate::distance::squared_euclidean;
use biocluster_common::{AnalysisError, Result};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Curve parameter `a` fitted for `min_dist = 0.1`, `spread = 1`
pub const CURVE_A: f64 = 1.576_943_460_405_378;
/// Curve parameter `b` fitted for `min_dist = 0.1`, `spread = 1`
pub const CURVE_B: f64 = 0.895_060_878_122_785_9;

const OUTPUT_DIM: usize = 2;
const INIT_RANGE: f64 = 10.0;
const GRADIENT_CLIP: f64 = 4.0;
const SIGMA_ITERATIONS: usize = 64;
const SIGMA_TOLERANCE: f64 = 1e-5;
const MIN_SIGMA_SCALE: f64 = 1e-3;
const LARGE_DATASET: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub n_neighbors: usize,
    /// `None` picks 500 epochs up to 10 000 rows and 200 above
    pub n_epochs: Option<usize>,
    pub seed: u64,
    pub negative_sample_rate: usize,
    pub learning_rate: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            n_epochs: None,
            seed: 42,
            negative_sample_rate: 5,
            learning_rate: 1.0,
        }
    }
}

impl EmbeddingConfig {
    pub fn epochs_for(&self, n_rows: usize) -> usize {
        self.n_epochs.unwrap_or(if n_rows <= LARGE_DATASET { 500 } else { 200 })
    }

    fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(AnalysisError::InvalidInput(format!(
                "n_neighbors must be at least 2, got {}",
                self.n_neighbors
            )));
        }
        if self.n_epochs == Some(0) {
            return Err(AnalysisError::InvalidInput(
                "n_epochs must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AnalysisError::InvalidInput(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Project rows to two dimensions
///
/// Zero rows give an empty `(0, 2)` array and a single row sits at the origin.
///
/// # Errors
/// - `InvalidInput` for an unusable configuration
/// - `NumericFailure` for non-finite input or output
pub fn embed(data: &Array2<f64>, config: &EmbeddingConfig) -> Result<Array2<f64>> {
    config.validate()?;
    let n = data.nrows();
    if data.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Embedding input contains non-finite values".to_string(),
        ));
    }
    if n <= 1 {
        return Ok(Array2::zeros((n, OUTPUT_DIM)));
    }

    let n_epochs = config.epochs_for(n);
    let k = config.n_neighbors.min(n) - 1;
    let knn = nearest_neighbours(data, k);
    let edges = fuzzy_union(&knn, k, n_epochs);
    debug!(
        "Fuzzy graph over {} rows: {} edges, {} epochs",
        n,
        edges.len(),
        n_epochs
    );

    let mut rng = fastrand::Rng::with_seed(config.seed);
    let mut layout = Array2::from_shape_fn((n, OUTPUT_DIM), |_| {
        rng.f64() * 2.0 * INIT_RANGE - INIT_RANGE
    });
    optimize_layout(&mut layout, &edges, n_epochs, config, &mut rng);

    if layout.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Embedding produced non-finite coordinates".to_string(),
        ));
    }
    Ok(layout)
}

/// `k` nearest other rows per row as `(index, distance)`, closest first
fn nearest_neighbours(data: &Array2<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = data.nrows();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let row = data.row(i);
            let mut candidates: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, squared_euclidean(row, data.row(j)).sqrt()))
                .collect();
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            candidates.truncate(k);
            candidates
        })
        .collect()
}

/// Local bandwidth so that memberships sum to `target`
fn smooth_distance(neighbours: &[(usize, f64)], rho: f64, target: f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = f64::INFINITY;
    let mut mid = 1.0;

    for _ in 0..SIGMA_ITERATIONS {
        let psum: f64 = neighbours
            .iter()
            .map(|&(_, d)| (-((d - rho).max(0.0)) / mid).exp())
            .sum();
        if (psum - target).abs() < SIGMA_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid
}

/// An edge of the symmetric fuzzy graph with its sampling period
#[derive(Debug, Clone, Copy)]
struct Edge {
    head: usize,
    tail: usize,
    epochs_per_sample: f64,
}

/// Build the symmetrized membership graph and convert weights to sampling periods
fn fuzzy_union(knn: &[Vec<(usize, f64)>], k: usize, n_epochs: usize) -> Vec<Edge> {
    // Self counts as a neighbour when sizing the target.
    let target = ((k + 1) as f64).log2();
    let global_mean = {
        let (sum, count) = knn
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, c), &(_, d)| (s + d, c + 1));
        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    };

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, neighbours) in knn.iter().enumerate() {
        let non_zero = neighbours.iter().map(|&(_, d)| d).find(|&d| d > 0.0);
        let rho = non_zero.unwrap_or(0.0);

        let mut sigma = smooth_distance(neighbours, rho, target);
        let local_mean = if neighbours.is_empty() {
            0.0
        } else {
            neighbours.iter().map(|&(_, d)| d).sum::<f64>() / neighbours.len() as f64
        };
        let floor = MIN_SIGMA_SCALE * if rho > 0.0 { local_mean } else { global_mean };
        sigma = sigma.max(floor);

        for &(j, d) in neighbours {
            let w = if d <= rho || sigma <= 0.0 {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            directed.insert((i, j), w);
        }
    }

    let mut symmetric: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &w) in &directed {
        let back = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let union = w + back - w * back;
        symmetric.insert((i, j), union);
        symmetric.insert((j, i), union);
    }

    let max_weight = symmetric.values().copied().fold(0.0, f64::max);
    if max_weight <= 0.0 {
        return Vec::new();
    }
    let cutoff = max_weight / n_epochs as f64;

    symmetric
        .into_iter()
        .filter(|&(_, w)| w >= cutoff)
        .map(|((head, tail), w)| Edge {
            head,
            tail,
            epochs_per_sample: max_weight / w,
        })
        .collect()
}

fn clip(value: f64) -> f64 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn optimize_layout(
    layout: &mut Array2<f64>,
    edges: &[Edge],
    n_epochs: usize,
    config: &EmbeddingConfig,
    rng: &mut fastrand::Rng,
) {
    let n = layout.nrows();
    let negative_rate = config.negative_sample_rate as f64;
    let mut next_sample: Vec<f64> = edges.iter().map(|e| e.epochs_per_sample).collect();
    let neg_period: Vec<f64> = edges
        .iter()
        .map(|e| e.epochs_per_sample / negative_rate.max(1.0))
        .collect();
    let mut next_negative = neg_period.clone();

    for epoch in 0..n_epochs {
        let alpha = config.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
        let now = epoch as f64;

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            let (i, j) = (edge.head, edge.tail);

            let dist_sq = squared_euclidean(layout.row(i), layout.row(j));
            let coeff = if dist_sq > 0.0 {
                -2.0 * CURVE_A * CURVE_B * dist_sq.powf(CURVE_B - 1.0)
                    / (CURVE_A * dist_sq.powf(CURVE_B) + 1.0)
            } else {
                0.0
            };
            for d in 0..OUTPUT_DIM {
                let grad = clip(coeff * (layout[[i, d]] - layout[[j, d]]));
                layout[[i, d]] += grad * alpha;
                layout[[j, d]] -= grad * alpha;
            }
            next_sample[e] += edge.epochs_per_sample;

            if config.negative_sample_rate == 0 {
                continue;
            }
            let n_negative = ((now - next_negative[e]) / neg_period[e]).floor().max(0.0) as usize;
            for _ in 0..n_negative {
                let other = rng.usize(..n);
                if other == i {
                    continue;
                }
                let dist_sq = squared_euclidean(layout.row(i), layout.row(other));
                let coeff = if dist_sq > 0.0 {
                    2.0 * CURVE_B / ((0.001 + dist_sq) * (CURVE_A * dist_sq.powf(CURVE_B) + 1.0))
                } else {
                    0.0
                };
                for d in 0..OUTPUT_DIM {
                    let grad = if coeff > 0.0 {
                        clip(coeff * (layout[[i, d]] - layout[[other, d]]))
                    } else {
                        GRADIENT_CLIP
                    };
                    layout[[i, d]] += grad * alpha;
                }
            }
            next_negative[e] += n_negative as f64 * neg_period[e];
        }
    }
}
