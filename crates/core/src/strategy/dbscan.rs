//! Density-based clustering (DBSCAN)

use super::{ClusterCountMode, ClusteringStrategy, ConfiguredClustering};
use crate::distance::Metric;
use crate::params::{invalid_value, ParamBag};
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::VecDeque;
use tracing::debug;

/// Neighbour search structure hint; every option runs a brute-force scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborSearch {
    Auto,
    BallTree,
    KdTree,
    Brute,
}

impl NeighborSearch {
    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(NeighborSearch::Auto),
            "ball_tree" => Ok(NeighborSearch::BallTree),
            "kd_tree" => Ok(NeighborSearch::KdTree),
            "brute" => Ok(NeighborSearch::Brute),
            other => Err(invalid_value(
                "algorithm",
                format!("{other:?}"),
                "auto, ball_tree, kd_tree or brute",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbscanParams {
    /// Neighbourhood radius (inclusive)
    pub eps: f64,
    /// Neighbours, the point itself included, needed for a core point
    pub min_samples: usize,
    pub metric: Metric,
    pub algorithm: NeighborSearch,
    pub leaf_size: usize,
    /// `Some(1)` disables the parallel neighbour scan
    pub n_jobs: Option<i64>,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 5,
            metric: Metric::Euclidean,
            algorithm: NeighborSearch::Auto,
            leaf_size: 30,
            n_jobs: None,
        }
    }
}

impl DbscanParams {
    pub const RECOGNIZED: &'static [&'static str] = &[
        "eps",
        "min_samples",
        "metric",
        "metric_params",
        "algorithm",
        "leaf_size",
        "p",
        "n_jobs",
    ];

    pub fn from_bag(bag: &ParamBag) -> Result<Self> {
        let defaults = Self::default();

        let eps = match bag.get_f64("eps")? {
            Some(eps) if eps <= 0.0 || !eps.is_finite() => {
                return Err(invalid_value("eps", eps, "a finite radius > 0"))
            }
            Some(eps) => eps,
            None => defaults.eps,
        };

        let min_samples = match bag.get_usize("min_samples")? {
            Some(0) => return Err(invalid_value("min_samples", 0, "a count >= 1")),
            Some(m) => m,
            None => defaults.min_samples,
        };

        let p = bag.get_f64("p")?;
        let metric = match bag.get_str("metric")? {
            Some(name) => Metric::parse("metric", name, p)?,
            None => defaults.metric,
        };

        let algorithm = match bag.get_str("algorithm")? {
            Some(name) => NeighborSearch::parse(name)?,
            None => defaults.algorithm,
        };

        let leaf_size = match bag.get_usize("leaf_size")? {
            Some(0) => return Err(invalid_value("leaf_size", 0, "a size >= 1")),
            Some(size) => size,
            None => defaults.leaf_size,
        };

        let n_jobs = match bag.get_i64("n_jobs")? {
            Some(0) => return Err(invalid_value("n_jobs", 0, "a non-zero job count")),
            other => other,
        };

        if bag.contains("metric_params") {
            debug!("Ignoring `metric_params` for DBSCAN");
        }

        Ok(Self {
            eps,
            min_samples,
            metric,
            algorithm,
            leaf_size,
            n_jobs,
        })
    }
}

/// Label rows by density reachability; rows reachable from no core point are noise
pub fn dbscan(data: &Array2<f64>, params: &DbscanParams) -> Result<Vec<ClusterLabel>> {
    let n = data.nrows();
    if data.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Feature matrix contains non-finite values".to_string(),
        ));
    }

    let neighbours_of = |i: usize| -> Vec<usize> {
        let row = data.row(i);
        (0..n)
            .filter(|&j| params.metric.distance(row, data.row(j)) <= params.eps)
            .collect()
    };
    let neighbourhoods: Vec<Vec<usize>> = if params.n_jobs == Some(1) {
        (0..n).map(neighbours_of).collect()
    } else {
        (0..n).into_par_iter().map(neighbours_of).collect()
    };

    let is_core: Vec<bool> = neighbourhoods
        .iter()
        .map(|hood| hood.len() >= params.min_samples)
        .collect();

    let mut labels = vec![ClusterLabel::Noise; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0usize;
    let mut queue = VecDeque::new();

    for start in 0..n {
        if visited[start] || !is_core[start] {
            continue;
        }
        let cluster = ClusterLabel::Cluster(next_cluster);
        next_cluster += 1;

        visited[start] = true;
        labels[start] = cluster;
        queue.push_back(start);
        while let Some(point) = queue.pop_front() {
            for &neighbour in &neighbourhoods[point] {
                if labels[neighbour].is_noise() {
                    labels[neighbour] = cluster;
                }
                if !visited[neighbour] && is_core[neighbour] {
                    visited[neighbour] = true;
                    queue.push_back(neighbour);
                }
            }
        }
    }

    let noise = labels.iter().filter(|l| l.is_noise()).count();
    debug!(
        "DBSCAN found {} clusters and {} noise points among {} rows",
        next_cluster, noise, n
    );

    Ok(labels)
}

/// Selector `dbscan`
pub struct DbscanStrategy;

impl ClusteringStrategy for DbscanStrategy {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn description(&self) -> &'static str {
        "Density-based clusters with explicit noise; no cluster count"
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        DbscanParams::RECOGNIZED
    }

    fn configure(&self, params: &ParamBag) -> Result<Box<dyn ConfiguredClustering>> {
        Ok(Box::new(ConfiguredDbscan {
            params: DbscanParams::from_bag(params)?,
        }))
    }
}

#[derive(Debug)]
struct ConfiguredDbscan {
    params: DbscanParams,
}

impl ConfiguredClustering for ConfiguredDbscan {
    fn count_mode(&self) -> ClusterCountMode {
        ClusterCountMode::NotApplicable
    }

    fn fit_predict(&self, data: &Array2<f64>, _k: Option<usize>) -> Result<Vec<ClusterLabel>> {
        dbscan(data, &self.params)
    }
}
