//! Partition-based clustering: k-means with Lloyd iterations
//!
//! Defaults mirror the conventional scientific-Python ones and are spelled out
//! in [`KMeansParams::default`].

use super::{check_k, ClusterCountMode, ClusteringStrategy, ConfiguredClustering};
use crate::distance::squared_euclidean;
use crate::matrix::distinct_rows;
use crate::params::{invalid_value, ParamBag};
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Centroid seeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMethod {
    /// D²-weighted seeding
    KMeansPlusPlus,
    /// k distinct rows chosen uniformly
    Random,
}

/// Number of restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NInit {
    /// 1 for k-means++, 10 for random seeding
    Auto,
    Runs(usize),
}

/// Optimization variant
///
/// Elkan's method is a triangle-inequality acceleration of the same iteration,
/// so both variants yield Lloyd partitions here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KMeansVariant {
    Lloyd,
    Elkan,
}

/// Typed k-means configuration
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansParams {
    /// Explicit k; `None` defers to the silhouette sweep
    pub n_clusters: Option<usize>,
    pub init: InitMethod,
    pub n_init: NInit,
    pub max_iter: usize,
    /// Relative tolerance, scaled by the mean feature variance
    pub tol: f64,
    /// Seed; `None` draws from entropy
    pub random_state: Option<u64>,
    /// Input is never mutated; kept for parity with callers that send it
    pub copy_x: bool,
    pub algorithm: KMeansVariant,
    /// Non-zero logs every iteration at debug level
    pub verbose: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            n_clusters: None,
            init: InitMethod::KMeansPlusPlus,
            n_init: NInit::Auto,
            max_iter: 300,
            tol: 1e-4,
            random_state: None,
            copy_x: true,
            algorithm: KMeansVariant::Lloyd,
            verbose: 0,
        }
    }
}

impl KMeansParams {
    pub const RECOGNIZED: &'static [&'static str] = &[
        "n_clusters",
        "init",
        "n_init",
        "max_iter",
        "tol",
        "random_state",
        "copy_x",
        "algorithm",
        "verbose",
    ];

    /// Read k-means keys from the bag, falling back to defaults
    pub fn from_bag(bag: &ParamBag) -> Result<Self> {
        let defaults = Self::default();

        let n_clusters = match bag.get_usize("n_clusters")? {
            Some(0) => return Err(invalid_value("n_clusters", 0, "a count >= 1")),
            other => other,
        };

        let init = match bag.get_str("init")? {
            None => defaults.init,
            Some("k-means++") => InitMethod::KMeansPlusPlus,
            Some("random") => InitMethod::Random,
            Some(other) => {
                return Err(invalid_value(
                    "init",
                    format!("{other:?}"),
                    "\"k-means++\" or \"random\"",
                ))
            }
        };

        let n_init = if !bag.contains("n_init") || matches!(bag.get_str("n_init"), Ok(Some("auto")))
        {
            NInit::Auto
        } else {
            match bag.get_usize("n_init")? {
                Some(0) => return Err(invalid_value("n_init", 0, "\"auto\" or a count >= 1")),
                Some(runs) => NInit::Runs(runs),
                None => NInit::Auto,
            }
        };

        let max_iter = match bag.get_usize("max_iter")? {
            Some(0) => return Err(invalid_value("max_iter", 0, "a count >= 1")),
            Some(v) => v,
            None => defaults.max_iter,
        };

        let tol = match bag.get_f64("tol")? {
            Some(t) if t < 0.0 => return Err(invalid_value("tol", t, "a value >= 0")),
            Some(t) => t,
            None => defaults.tol,
        };

        let algorithm = match bag.get_str("algorithm")? {
            None => defaults.algorithm,
            Some("lloyd" | "full" | "auto") => KMeansVariant::Lloyd,
            Some("elkan") => KMeansVariant::Elkan,
            Some(other) => {
                return Err(invalid_value(
                    "algorithm",
                    format!("{other:?}"),
                    "\"lloyd\" or \"elkan\"",
                ))
            }
        };

        Ok(Self {
            n_clusters,
            init,
            n_init,
            max_iter,
            tol,
            random_state: bag.get_u64("random_state")?,
            copy_x: bag.get_bool("copy_x")?.unwrap_or(defaults.copy_x),
            algorithm,
            verbose: bag.get_u64("verbose")?.unwrap_or(defaults.verbose),
        })
    }

    /// Restarts actually performed
    pub fn restarts(&self) -> usize {
        match (self.n_init, self.init) {
            (NInit::Runs(runs), _) => runs,
            (NInit::Auto, InitMethod::KMeansPlusPlus) => 1,
            (NInit::Auto, InitMethod::Random) => 10,
        }
    }
}

/// Outcome of the best restart
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Centroid index per row
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
    pub n_iter: usize,
    pub converged: bool,
}

/// Fit k-means with exactly `k` non-empty clusters
///
/// # Errors
/// - `InvalidInput` for `k == 0`
/// - `DegenerateData` when fewer than `k` rows (or distinct rows) exist
/// - `NumericFailure` on non-finite data or inertia
pub fn fit(data: &Array2<f64>, k: usize, params: &KMeansParams) -> Result<KMeansFit> {
    let n = data.nrows();
    check_k(k, n)?;

    if data.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "k-means input contains non-finite values".to_string(),
        ));
    }

    let distinct = distinct_rows(data);
    if distinct < k {
        return Err(AnalysisError::DegenerateData(format!(
            "Requested {k} clusters but only {distinct} distinct records exist"
        )));
    }

    let tol = params.tol * data.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);
    let mut rng = match params.random_state {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };

    if params.algorithm == KMeansVariant::Elkan {
        debug!("Elkan variant requested; running Lloyd iterations");
    }

    let mut best: Option<KMeansFit> = None;
    for run in 0..params.restarts() {
        let seeds = match params.init {
            InitMethod::KMeansPlusPlus => plus_plus_init(data, k, &mut rng),
            InitMethod::Random => random_init(data, k, &mut rng),
        };
        let candidate = lloyd(data, seeds, params.max_iter, tol, params.verbose > 0);
        debug!(
            "k-means run {} (k={}): inertia {:.6} after {} iterations",
            run, k, candidate.inertia, candidate.n_iter
        );
        if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }

    let best = best.ok_or_else(|| {
        AnalysisError::NumericFailure("k-means performed no restarts".to_string())
    })?;

    if !best.inertia.is_finite() {
        return Err(AnalysisError::NumericFailure(format!(
            "k-means inertia is not finite for k={k}"
        )));
    }
    if !best.converged {
        warn!(
            "k-means (k={}) stopped at max_iter={} before reaching tol",
            k, params.max_iter
        );
    }

    Ok(best)
}

fn plus_plus_init(data: &Array2<f64>, k: usize, rng: &mut fastrand::Rng) -> Array2<f64> {
    let n = data.nrows();
    let first = rng.usize(0..n);
    let mut chosen = Vec::with_capacity(k);
    chosen.push(first);

    let mut closest: Vec<f64> = (0..n)
        .map(|i| squared_euclidean(data.row(i), data.row(first)))
        .collect();

    while chosen.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.f64() * total;
            let mut acc = 0.0;
            let mut pick = first;
            for (i, &w) in closest.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                acc += w;
                pick = i;
                if acc > target {
                    break;
                }
            }
            pick
        } else {
            rng.usize(0..n)
        };

        chosen.push(next);
        for (i, c) in closest.iter_mut().enumerate() {
            let d = squared_euclidean(data.row(i), data.row(next));
            if d < *c {
                *c = d;
            }
        }
    }

    data.select(Axis(0), &chosen)
}

fn random_init(data: &Array2<f64>, k: usize, rng: &mut fastrand::Rng) -> Array2<f64> {
    let n = data.nrows();
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.usize(i..n);
        indices.swap(i, j);
    }
    data.select(Axis(0), &indices[..k])
}

fn lloyd(
    data: &Array2<f64>,
    mut centroids: Array2<f64>,
    max_iter: usize,
    tol: f64,
    verbose: bool,
) -> KMeansFit {
    let k = centroids.nrows();
    let mut n_iter = 0;
    let mut converged = false;

    for iter in 0..max_iter {
        n_iter = iter + 1;
        let (mut labels, dists) = assign(data, &centroids);
        fill_empty_clusters(&mut labels, &dists, k);
        let updated = centroid_means(data, &labels, k);

        let shift = (&updated - &centroids).mapv(|v| v * v).sum();
        centroids = updated;

        if verbose {
            debug!(
                "Iteration {}: inertia {:.6}, centroid shift {:.3e}",
                n_iter,
                dists.iter().sum::<f64>(),
                shift
            );
        }
        if shift <= tol {
            converged = true;
            break;
        }
    }

    // Final assignment against the settled centroids
    let (mut labels, dists) = assign(data, &centroids);
    if fill_empty_clusters(&mut labels, &dists, k) {
        centroids = centroid_means(data, &labels, k);
    }

    let inertia = labels
        .iter()
        .enumerate()
        .map(|(i, &c)| squared_euclidean(data.row(i), centroids.row(c)))
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
        n_iter,
        converged,
    }
}

/// Nearest centroid per row (ties go to the lower index) and its squared distance
fn assign(data: &Array2<f64>, centroids: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let row = data.row(i);
            let mut best = (0, f64::INFINITY);
            for (c, centroid) in centroids.rows().into_iter().enumerate() {
                let d = squared_euclidean(row, centroid);
                if d < best.1 {
                    best = (c, d);
                }
            }
            best
        })
        .unzip()
}

/// Move the rows farthest from their centroid into empty clusters
///
/// Only rows whose cluster keeps at least one other member are moved, so every
/// cluster ends up non-empty whenever there are at least `k` rows.
fn fill_empty_clusters(labels: &mut [usize], dists: &[f64], k: usize) -> bool {
    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    let empty: Vec<usize> = (0..k).filter(|&c| counts[c] == 0).collect();
    if empty.is_empty() {
        return false;
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| dists[b].total_cmp(&dists[a]).then(a.cmp(&b)));
    let mut candidates = order.into_iter();

    for c in empty {
        for p in candidates.by_ref() {
            let from = labels[p];
            if counts[from] > 1 {
                counts[from] -= 1;
                labels[p] = c;
                counts[c] = 1;
                debug!("Re-seeded empty cluster {} with row {}", c, p);
                break;
            }
        }
    }
    true
}

fn centroid_means(data: &Array2<f64>, labels: &[usize], k: usize) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];
    for (i, &c) in labels.iter().enumerate() {
        sums.row_mut(c).scaled_add(1.0, &data.row(i));
        counts[c] += 1;
    }
    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            let divisor = count as f64;
            sums.row_mut(c).mapv_inplace(|v| v / divisor);
        }
    }
    sums
}

/// Selector `kmeans`
pub struct KMeansStrategy;

impl ClusteringStrategy for KMeansStrategy {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["k-means"]
    }

    fn description(&self) -> &'static str {
        "Partition into k groups by iterative centroid refinement (Lloyd)"
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        KMeansParams::RECOGNIZED
    }

    fn configure(&self, params: &ParamBag) -> Result<Box<dyn ConfiguredClustering>> {
        Ok(Box::new(ConfiguredKMeans {
            params: KMeansParams::from_bag(params)?,
        }))
    }
}

#[derive(Debug)]
struct ConfiguredKMeans {
    params: KMeansParams,
}

impl ConfiguredClustering for ConfiguredKMeans {
    fn count_mode(&self) -> ClusterCountMode {
        ClusterCountMode::Partition {
            explicit: self.params.n_clusters,
        }
    }

    fn fit_predict(&self, data: &Array2<f64>, k: Option<usize>) -> Result<Vec<ClusterLabel>> {
        let k = k.or(self.params.n_clusters).ok_or_else(|| {
            AnalysisError::InvalidInput("k-means needs a cluster count".to_string())
        })?;
        let fit = fit(data, k, &self.params)?;
        Ok(fit.labels.into_iter().map(ClusterLabel::Cluster).collect())
    }
}
