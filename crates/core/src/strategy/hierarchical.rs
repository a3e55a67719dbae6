//! Agglomerative (hierarchical) clustering
//!
//! Bottom-up merging with Lance-Williams distance updates. Each active cluster
//! caches its nearest neighbour; all supported linkages are reducible, so only
//! clusters whose neighbour took part in a merge need a full rescan.

use super::{
    check_k, relabel_by_first_appearance, ClusterCountMode, ClusteringStrategy,
    ConfiguredClustering,
};
use crate::distance::Metric;
use crate::params::{invalid_value, ParamBag};
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Minimum increase in within-cluster variance (Euclidean only)
    Ward,
    /// Maximum pairwise distance
    Complete,
    /// Mean pairwise distance
    Average,
    /// Minimum pairwise distance
    Single,
}

impl Linkage {
    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ward" => Ok(Linkage::Ward),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            "single" => Ok(Linkage::Single),
            other => Err(invalid_value(
                "linkage",
                format!("{other:?}"),
                "ward, complete, average or single",
            )),
        }
    }

    /// Distance from `k` to the union of `a` and `b`
    fn update(self, d_ka: f64, d_kb: f64, d_ab: f64, n_a: f64, n_b: f64, n_k: f64) -> f64 {
        match self {
            Linkage::Single => d_ka.min(d_kb),
            Linkage::Complete => d_ka.max(d_kb),
            Linkage::Average => (n_a * d_ka + n_b * d_kb) / (n_a + n_b),
            Linkage::Ward => {
                let total = n_a + n_b + n_k;
                let sq = ((n_a + n_k) * d_ka * d_ka + (n_b + n_k) * d_kb * d_kb - n_k * d_ab * d_ab)
                    / total;
                sq.max(0.0).sqrt()
            }
        }
    }
}

/// Typed agglomerative configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalParams {
    pub n_clusters: Option<usize>,
    pub metric: Metric,
    pub linkage: Linkage,
    /// Stop merging once the closest pair is at least this far apart
    pub distance_threshold: Option<f64>,
    /// Accepted hint; the full tree is only built when cutting by threshold
    pub compute_full_tree: Option<bool>,
    /// Accepted hint; merge heights are always tracked
    pub compute_distances: bool,
}

impl Default for HierarchicalParams {
    fn default() -> Self {
        Self {
            n_clusters: None,
            metric: Metric::Euclidean,
            linkage: Linkage::Ward,
            distance_threshold: None,
            compute_full_tree: None,
            compute_distances: false,
        }
    }
}

impl HierarchicalParams {
    pub const RECOGNIZED: &'static [&'static str] = &[
        "n_clusters",
        "metric",
        "memory",
        "connectivity",
        "compute_full_tree",
        "linkage",
        "distance_threshold",
        "compute_distances",
    ];

    pub fn from_bag(bag: &ParamBag) -> Result<Self> {
        let defaults = Self::default();

        let n_clusters = match bag.get_usize("n_clusters")? {
            Some(0) => return Err(invalid_value("n_clusters", 0, "a count >= 1")),
            other => other,
        };

        let metric = match bag.get_str("metric")? {
            None => defaults.metric,
            Some(name) => {
                let metric = Metric::parse("metric", name, None)?;
                if !matches!(metric, Metric::Euclidean | Metric::Manhattan | Metric::Cosine) {
                    return Err(invalid_value(
                        "metric",
                        format!("{name:?}"),
                        "euclidean, manhattan or cosine",
                    ));
                }
                metric
            }
        };

        let linkage = match bag.get_str("linkage")? {
            None => defaults.linkage,
            Some(name) => Linkage::parse(name)?,
        };

        if linkage == Linkage::Ward && metric != Metric::Euclidean {
            return Err(AnalysisError::InvalidInput(format!(
                "Ward linkage requires the euclidean metric, got {}",
                metric.name()
            )));
        }

        let distance_threshold = match bag.get_f64("distance_threshold")? {
            Some(t) if t < 0.0 => {
                return Err(invalid_value("distance_threshold", t, "a value >= 0"))
            }
            other => other,
        };

        if distance_threshold.is_some() && n_clusters.is_some() {
            return Err(AnalysisError::InvalidInput(
                "Set either n_clusters or distance_threshold, not both".to_string(),
            ));
        }

        if bag.contains("connectivity") {
            return Err(AnalysisError::InvalidInput(
                "Connectivity constraints are not supported".to_string(),
            ));
        }
        if bag.contains("memory") {
            debug!("Ignoring `memory` hint for hierarchical clustering");
        }

        let compute_full_tree = match bag.raw("compute_full_tree") {
            Some(serde_json::Value::String(s)) if s == "auto" => None,
            _ => bag.get_bool("compute_full_tree")?,
        };

        Ok(Self {
            n_clusters,
            metric,
            linkage,
            distance_threshold,
            compute_full_tree,
            compute_distances: bag
                .get_bool("compute_distances")?
                .unwrap_or(defaults.compute_distances),
        })
    }
}

/// Where to stop merging
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cut {
    Clusters(usize),
    Threshold(f64),
}

/// One merge step of the dendrogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    /// Surviving slot (lower index)
    pub into: usize,
    /// Absorbed slot
    pub from: usize,
    pub distance: f64,
    pub size: usize,
}

/// Cluster rows and return a group id per row plus the merges performed
///
/// # Errors
/// - `InvalidInput` / `DegenerateData` for a cluster count outside `1..=rows`
/// - `NumericFailure` when a pairwise distance is not finite
pub fn agglomerate(
    data: &Array2<f64>,
    metric: Metric,
    linkage: Linkage,
    cut: Cut,
) -> Result<(Vec<usize>, Vec<Merge>)> {
    let n = data.nrows();
    let target = match cut {
        Cut::Clusters(k) => {
            check_k(k, n)?;
            k
        }
        Cut::Threshold(_) => 1,
    };
    if n == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut dist = vec![0.0f64; n * n];
    dist.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let a = data.row(i);
        for (j, slot) in row.iter_mut().enumerate() {
            if i != j {
                *slot = metric.distance(a, data.row(j));
            }
        }
    });
    if dist.iter().any(|d| !d.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Pairwise distance is not finite".to_string(),
        ));
    }

    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut nn = vec![usize::MAX; n];
    let mut nn_dist = vec![f64::INFINITY; n];
    for i in 0..n {
        rescan(i, &dist, &active, n, &mut nn, &mut nn_dist);
    }

    let mut merges = Vec::with_capacity(n.saturating_sub(target));
    let mut clusters = n;

    while clusters > target {
        let mut best = usize::MAX;
        for i in 0..n {
            if active[i] && (best == usize::MAX || nn_dist[i] < nn_dist[best]) {
                best = i;
            }
        }
        if best == usize::MAX || nn[best] == usize::MAX {
            break;
        }

        let d_ab = nn_dist[best];
        if let Cut::Threshold(threshold) = cut {
            if d_ab >= threshold {
                break;
            }
        }

        let (a, b) = if best < nn[best] {
            (best, nn[best])
        } else {
            (nn[best], best)
        };
        let (n_a, n_b) = (size[a] as f64, size[b] as f64);

        for k in 0..n {
            if !active[k] || k == a || k == b {
                continue;
            }
            let updated = linkage.update(
                dist[k * n + a],
                dist[k * n + b],
                d_ab,
                n_a,
                n_b,
                size[k] as f64,
            );
            dist[k * n + a] = updated;
            dist[a * n + k] = updated;
        }

        active[b] = false;
        size[a] += size[b];
        let absorbed = std::mem::take(&mut members[b]);
        members[a].extend(absorbed);
        clusters -= 1;
        merges.push(Merge {
            into: a,
            from: b,
            distance: d_ab,
            size: size[a],
        });

        rescan(a, &dist, &active, n, &mut nn, &mut nn_dist);
        for k in 0..n {
            if !active[k] || k == a {
                continue;
            }
            if nn[k] == a || nn[k] == b {
                rescan(k, &dist, &active, n, &mut nn, &mut nn_dist);
            } else {
                let d = dist[k * n + a];
                if d < nn_dist[k] || (d == nn_dist[k] && a < nn[k]) {
                    nn[k] = a;
                    nn_dist[k] = d;
                }
            }
        }
    }

    let mut group = vec![0usize; n];
    for (slot, rows) in members.iter().enumerate() {
        for &row in rows {
            group[row] = slot;
        }
    }

    debug!(
        "Agglomeration finished with {} clusters after {} merges",
        clusters,
        merges.len()
    );

    Ok((group, merges))
}

/// Recompute the nearest active neighbour of `i` (ties go to the lower index)
fn rescan(
    i: usize,
    dist: &[f64],
    active: &[bool],
    n: usize,
    nn: &mut [usize],
    nn_dist: &mut [f64],
) {
    let mut best = (usize::MAX, f64::INFINITY);
    for j in 0..n {
        if j != i && active[j] && dist[i * n + j] < best.1 {
            best = (j, dist[i * n + j]);
        }
    }
    // A lone cluster at infinite distance still needs a partner.
    if best.0 == usize::MAX {
        best.0 = (0..n).find(|&j| j != i && active[j]).unwrap_or(usize::MAX);
    }
    nn[i] = best.0;
    nn_dist[i] = best.1;
}

/// Selector `hierarchical`
pub struct HierarchicalStrategy;

impl ClusteringStrategy for HierarchicalStrategy {
    fn name(&self) -> &'static str {
        "hierarchical"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["hierarquical", "agglomerative"]
    }

    fn description(&self) -> &'static str {
        "Agglomerative merging of nearest groups, cut at k or a distance threshold"
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        HierarchicalParams::RECOGNIZED
    }

    fn configure(&self, params: &ParamBag) -> Result<Box<dyn ConfiguredClustering>> {
        Ok(Box::new(ConfiguredHierarchical {
            params: HierarchicalParams::from_bag(params)?,
        }))
    }
}

#[derive(Debug)]
struct ConfiguredHierarchical {
    params: HierarchicalParams,
}

impl ConfiguredClustering for ConfiguredHierarchical {
    fn count_mode(&self) -> ClusterCountMode {
        if self.params.distance_threshold.is_some() {
            ClusterCountMode::Threshold
        } else {
            ClusterCountMode::Partition {
                explicit: self.params.n_clusters,
            }
        }
    }

    fn fit_predict(&self, data: &Array2<f64>, k: Option<usize>) -> Result<Vec<ClusterLabel>> {
        let cut = match self.params.distance_threshold {
            Some(threshold) => Cut::Threshold(threshold),
            None => Cut::Clusters(k.or(self.params.n_clusters).ok_or_else(|| {
                AnalysisError::InvalidInput(
                    "Hierarchical clustering needs a cluster count or distance_threshold"
                        .to_string(),
                )
            })?),
        };
        let (groups, _) = agglomerate(data, self.params.metric, self.params.linkage, cut)?;
        Ok(relabel_by_first_appearance(&groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::ErrorKind;
    use ndarray::array;
    use serde_json::json;
    use std::collections::HashSet;

    fn line() -> Array2<f64> {
        array![[0.0], [1.0], [2.0], [10.0], [11.0], [30.0]]
    }

    fn raw(labels: &[ClusterLabel]) -> Vec<i64> {
        labels.iter().map(|l| l.as_i64()).collect()
    }

    #[test]
    fn test_defaults() {
        let params = HierarchicalParams::from_bag(&ParamBag::new()).unwrap();
        assert_eq!(params.linkage, Linkage::Ward);
        assert_eq!(params.metric, Metric::Euclidean);
        assert_eq!(params.distance_threshold, None);
    }

    #[test]
    fn test_cut_at_k_for_every_linkage() {
        for linkage in [Linkage::Ward, Linkage::Complete, Linkage::Average, Linkage::Single] {
            let (groups, merges) =
                agglomerate(&line(), Metric::Euclidean, linkage, Cut::Clusters(3)).unwrap();
            let labels = relabel_by_first_appearance(&groups);
            assert_eq!(raw(&labels), vec![0, 0, 0, 1, 1, 2], "{linkage:?}");
            assert_eq!(merges.len(), 3);
        }
    }

    #[test]
    fn test_single_linkage_heights() {
        let (_, merges) =
            agglomerate(&line(), Metric::Euclidean, Linkage::Single, Cut::Clusters(1)).unwrap();
        let heights: Vec<f64> = merges.iter().map(|m| m.distance).collect();
        assert_eq!(heights, vec![1.0, 1.0, 1.0, 8.0, 19.0]);
        assert_eq!(merges.last().unwrap().size, 6);
    }

    #[test]
    fn test_ward_height_matches_centroid_formula() {
        // Clusters {0, 2} and {10}: sqrt(2 * 2 * 1 / 3) * |1 - 10|
        let data = array![[0.0], [2.0], [10.0]];
        let (_, merges) =
            agglomerate(&data, Metric::Euclidean, Linkage::Ward, Cut::Clusters(1)).unwrap();
        assert_eq!(merges[0].distance, 2.0);
        let expected = (4.0f64 / 3.0).sqrt() * 9.0;
        assert!((merges[1].distance - expected).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_cut() {
        let bag = ParamBag::new()
            .with("distance_threshold", 5.0)
            .with("linkage", "single");
        let configured = HierarchicalStrategy.configure(&bag).unwrap();
        assert_eq!(configured.count_mode(), ClusterCountMode::Threshold);
        let labels = configured.fit_predict(&line(), None).unwrap();
        assert_eq!(raw(&labels), vec![0, 0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_invalid_combinations() {
        for value in [
            json!({"linkage": "ward", "metric": "manhattan"}),
            json!({"linkage": "median"}),
            json!({"n_clusters": 2, "distance_threshold": 1.0}),
            json!({"connectivity": [[0, 1], [1, 0]]}),
            json!({"metric": "chebyshev", "linkage": "average"}),
        ] {
            let bag = ParamBag::from_value(value.clone()).unwrap();
            let err = HierarchicalStrategy.configure(&bag).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{value}");
        }
    }

    #[test]
    fn test_manhattan_average_and_noise_free() {
        let bag = ParamBag::new()
            .with("metric", "manhattan")
            .with("linkage", "average");
        let configured = HierarchicalStrategy.configure(&bag).unwrap();
        let data = array![[0.0, 0.0], [0.0, 1.0], [5.0, 5.0], [5.0, 6.0]];
        let labels = configured.fit_predict(&data, Some(2)).unwrap();
        assert_eq!(raw(&labels), vec![0, 0, 1, 1]);
        assert!(labels.iter().all(|l| !l.is_noise()));
    }

    #[test]
    fn test_k_equal_rows_keeps_singletons() {
        let (groups, merges) =
            agglomerate(&line(), Metric::Euclidean, Linkage::Ward, Cut::Clusters(6)).unwrap();
        assert!(merges.is_empty());
        let distinct: HashSet<_> = groups.iter().collect();
        assert_eq!(distinct.len(), 6);

        let err =
            agglomerate(&line(), Metric::Euclidean, Linkage::Ward, Cut::Clusters(7)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);
    }
}
