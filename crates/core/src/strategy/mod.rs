//! Clustering strategies and selector-based dispatch

pub mod dbscan;
pub mod hierarchical;
pub mod kmeans;

use crate::params::ParamBag;
use biocluster_common::{AnalysisError, ClusterLabel, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use dbscan::{DbscanParams, DbscanStrategy};
pub use hierarchical::{HierarchicalParams, HierarchicalStrategy, Linkage};
pub use kmeans::{KMeansFit, KMeansParams, KMeansStrategy};

/// How a configured strategy arrives at its number of clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterCountMode {
    /// Exactly `k` groups; `explicit` is the caller's count, otherwise the
    /// count is chosen by the silhouette sweep
    Partition { explicit: Option<usize> },
    /// A distance threshold decides; the count is read off the labels
    Threshold,
    /// Density-based; there is no `k`
    NotApplicable,
}

/// A clustering family addressable by selector name
pub trait ClusteringStrategy: Send + Sync {
    /// Canonical selector
    fn name(&self) -> &'static str;

    /// Additional selectors routed to this strategy
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn description(&self) -> &'static str;

    /// Parameter keys this strategy reads from the bag
    fn recognized_params(&self) -> &'static [&'static str];

    /// Parse and validate parameters without touching any data
    fn configure(&self, params: &ParamBag) -> Result<Box<dyn ConfiguredClustering>>;
}

/// A strategy bound to validated parameters
pub trait ConfiguredClustering: Send + Sync + fmt::Debug {
    fn count_mode(&self) -> ClusterCountMode;

    /// Label every row; `k` is supplied for `Partition` strategies only
    fn fit_predict(&self, data: &Array2<f64>, k: Option<usize>) -> Result<Vec<ClusterLabel>>;
}

/// Strategy lookup by selector
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn ClusteringStrategy>>,
    /// Canonical names in registration order
    order: Vec<&'static str>,
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            strategies: HashMap::with_capacity(4),
            order: Vec::with_capacity(3),
        }
    }

    /// Registry with k-means, hierarchical and DBSCAN
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KMeansStrategy));
        registry.register(Arc::new(HierarchicalStrategy));
        registry.register(Arc::new(DbscanStrategy));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ClusteringStrategy>) {
        let name = strategy.name();
        debug!("Registering clustering strategy: {}", name);

        for &alias in strategy.aliases() {
            self.strategies.insert(alias, Arc::clone(&strategy));
        }
        if self.strategies.insert(name, strategy).is_none() {
            self.order.push(name);
        }
    }

    /// Resolve a selector (case-insensitive, surrounding whitespace ignored)
    ///
    /// # Errors
    /// `UnsupportedAlgorithm` for any selector not registered
    pub fn lookup(&self, selector: &str) -> Result<Arc<dyn ClusteringStrategy>> {
        let key = selector.trim().to_ascii_lowercase();
        self.strategies.get(key.as_str()).cloned().ok_or_else(|| {
            AnalysisError::UnsupportedAlgorithm(format!(
                "{selector:?} (expected one of: {})",
                self.order.join(", ")
            ))
        })
    }

    /// Canonical selector names in registration order
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn strategies(&self) -> impl Iterator<Item = &Arc<dyn ClusteringStrategy>> {
        self.order.iter().filter_map(|name| self.strategies.get(name))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Reject an explicit `k` of zero or above the row count
pub(crate) fn check_k(k: usize, n_rows: usize) -> Result<()> {
    if k == 0 {
        return Err(AnalysisError::InvalidInput(
            "Number of clusters must be at least 1".to_string(),
        ));
    }
    if k > n_rows {
        return Err(AnalysisError::DegenerateData(format!(
            "Requested {k} clusters but only {n_rows} records are available"
        )));
    }
    Ok(())
}

/// Renumber labels by order of first appearance
pub(crate) fn relabel_by_first_appearance(groups: &[usize]) -> Vec<ClusterLabel> {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    groups
        .iter()
        .map(|g| {
            let next = mapping.len();
            ClusterLabel::Cluster(*mapping.entry(*g).or_insert(next))
        })
        .collect()
}
