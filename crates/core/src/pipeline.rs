//! End-to-end analysis: join, standardize, cluster and embed

use crate::compose::{compose, ClusterResult};
use crate::embedding::{embed, EmbeddingConfig};
use crate::join::join_records;
use crate::matrix::FeatureMatrix;
use crate::normalize::standardize;
use crate::params::ParamBag;
use crate::selector::{check_sweep_preconditions, select_cluster_count, SweepConfig};
use crate::strategy::{
    check_k, ClusterCountMode, ConfiguredClustering, KMeansParams, StrategyRegistry,
};
use biocluster_common::{
    AnalysisError, ClusterLabel, FeatureSchema, JoinedRecord, MediaLink, OccurrenceRecord, Result,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tunables shared by every run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sweep: SweepConfig,
    pub embedding: EmbeddingConfig,
}

/// What to run and how
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Strategy selector, e.g. `kmeans`
    pub algorithm: String,
    pub params: ParamBag,
    /// Required feature columns, in matrix order
    pub schema: FeatureSchema,
    /// Overrides `params["n_clusters"]` when set
    pub n_clusters: Option<usize>,
    pub config: PipelineConfig,
}

impl AnalysisRequest {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            params: ParamBag::new(),
            schema: FeatureSchema::default(),
            n_clusters: None,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_params(mut self, params: ParamBag) -> Self {
        self.params = params;
        self
    }

    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_n_clusters(mut self, n_clusters: usize) -> Self {
        self.n_clusters = Some(n_clusters);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Parameter bag with the explicit cluster count folded in
    pub fn effective_params(&self) -> ParamBag {
        match self.n_clusters {
            Some(k) => self.params.clone().with("n_clusters", k),
            None => self.params.clone(),
        }
    }
}

/// Validated strategy plus how its cluster count is resolved
#[derive(Debug)]
struct Plan {
    strategy: &'static str,
    clustering: Box<dyn ConfiguredClustering>,
    /// k-means settings for the silhouette sweep, when one is needed
    sweep: Option<KMeansParams>,
}

/// Runs analyses against a strategy registry
#[derive(Default)]
pub struct Analyzer {
    registry: StrategyRegistry,
}

impl Analyzer {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Join raw occurrences with media links, then analyze
    pub fn run<L>(
        &self,
        records: Vec<OccurrenceRecord>,
        links: L,
        request: &AnalysisRequest,
    ) -> Result<ClusterResult>
    where
        L: IntoIterator<Item = MediaLink>,
    {
        let plan = self.plan(request)?;
        let outcome = join_records(records, links, &request.schema)?;
        let matrix = FeatureMatrix::from_joined(&outcome.records, &request.schema)?;
        self.execute(plan, matrix, request)
    }

    /// Analyze records that are already joined and filtered
    pub fn run_on_joined(
        &self,
        joined: &[JoinedRecord],
        request: &AnalysisRequest,
    ) -> Result<ClusterResult> {
        let plan = self.plan(request)?;
        if joined.is_empty() {
            return Err(AnalysisError::InvalidInput("Empty dataset".to_string()));
        }
        let matrix = FeatureMatrix::from_joined(joined, &request.schema)?;
        self.execute(plan, matrix, request)
    }

    /// Analyze a raw (unstandardized) feature matrix
    pub fn run_on_matrix(
        &self,
        matrix: FeatureMatrix,
        request: &AnalysisRequest,
    ) -> Result<ClusterResult> {
        let plan = self.plan(request)?;
        if matrix.nrows() == 0 {
            return Err(AnalysisError::InvalidInput("Empty dataset".to_string()));
        }
        self.execute(plan, matrix, request)
    }

    /// Check the selector and parameters without touching any data
    ///
    /// Callers that read inputs from disk run this first so a bad request
    /// fails before the read.
    pub fn validate(&self, request: &AnalysisRequest) -> Result<()> {
        self.plan(request).map(|_| ())
    }

    /// Resolve the selector and validate parameters before any data work
    fn plan(&self, request: &AnalysisRequest) -> Result<Plan> {
        let strategy = self.registry.lookup(&request.algorithm)?;
        let params = request.effective_params();
        let clustering = strategy.configure(&params)?;

        let sweep = match clustering.count_mode() {
            ClusterCountMode::Partition { explicit: None } => {
                Some(KMeansParams::from_bag(&params)?)
            }
            _ => None,
        };

        let unknown: Vec<&str> = params
            .keys()
            .filter(|key| !strategy.recognized_params().iter().any(|known| known == key))
            .collect();
        if !unknown.is_empty() {
            debug!(
                "Ignoring parameters not used by {}: {}",
                strategy.name(),
                unknown.join(", ")
            );
        }

        Ok(Plan {
            strategy: strategy.name(),
            clustering,
            sweep,
        })
    }

    fn execute(
        &self,
        plan: Plan,
        matrix: FeatureMatrix,
        request: &AnalysisRequest,
    ) -> Result<ClusterResult> {
        let started = Instant::now();
        let n = matrix.nrows();
        info!(
            "Analyzing {} records with {} ({} features)",
            n,
            plan.strategy,
            matrix.ncols()
        );

        let standardized = standardize(matrix)?;
        let data = standardized.matrix.data();

        match plan.clustering.count_mode() {
            ClusterCountMode::Partition { explicit: Some(k) } => check_k(k, n)?,
            ClusterCountMode::Partition { explicit: None } => {
                check_sweep_preconditions(data, &request.config.sweep)?
            }
            ClusterCountMode::NotApplicable if request.n_clusters.is_some() => {
                warn!("{} does not take a cluster count; ignoring n_clusters", plan.strategy);
            }
            _ => {}
        }

        let (embedding, clustering) = rayon::join(
            || embed(data, &request.config.embedding),
            || cluster(&plan, data, &request.config.sweep),
        );
        let (labels, best_k) = clustering?;
        let embedding = embedding?;

        let result = compose(&embedding, &labels, best_k)?;
        info!(
            "Finished {} in {:.2?}: {} clusters, {} noise points",
            plan.strategy,
            started.elapsed(),
            result.cluster_count(),
            result.noise_count()
        );
        Ok(result)
    }
}

/// Clustering branch: resolve k, then label every row
fn cluster(
    plan: &Plan,
    data: &Array2<f64>,
    sweep: &SweepConfig,
) -> Result<(Vec<ClusterLabel>, Option<usize>)> {
    match plan.clustering.count_mode() {
        ClusterCountMode::Partition { explicit } => {
            let k = match (explicit, &plan.sweep) {
                (Some(k), _) => k,
                (None, Some(params)) => select_cluster_count(data, params, sweep)?.best_k,
                (None, None) => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "{} needs a cluster count",
                        plan.strategy
                    )))
                }
            };
            info!("Clustering with k={}", k);
            let labels = plan.clustering.fit_predict(data, Some(k))?;
            Ok((labels, Some(k)))
        }
        ClusterCountMode::Threshold => {
            let labels = plan.clustering.fit_predict(data, None)?;
            let produced = labels.iter().collect::<BTreeSet<_>>().len();
            info!("Distance threshold produced {} clusters", produced);
            Ok((labels, Some(produced)))
        }
        ClusterCountMode::NotApplicable => {
            let labels = plan.clustering.fit_predict(data, None)?;
            Ok((labels, None))
        }
    }
}

/// Join, standardize, cluster and embed with the default strategies
///
/// # Errors
/// The first failure in the order: selector, parameters, join, normalization,
/// cluster-count preconditions, numeric work.
pub fn run_pipeline<L>(
    records: Vec<OccurrenceRecord>,
    links: L,
    request: &AnalysisRequest,
) -> Result<ClusterResult>
where
    L: IntoIterator<Item = MediaLink>,
{
    Analyzer::default().run(records, links, request)
}

/// Selector and parameter checks of [`run_pipeline`], without any data
pub fn validate_request(request: &AnalysisRequest) -> Result<()> {
    Analyzer::default().validate(request)
}

/// [`run_pipeline`] for records that are already joined and filtered
pub fn run_on_joined(joined: &[JoinedRecord], request: &AnalysisRequest) -> Result<ClusterResult> {
    Analyzer::default().run_on_joined(joined, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::{ErrorKind, FeatureColumn};
    use std::collections::HashSet;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureColumn::DecimalLatitude,
            FeatureColumn::DecimalLongitude,
        ])
        .unwrap()
    }

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            embedding: EmbeddingConfig {
                n_epochs: Some(30),
                ..EmbeddingConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    /// Three spatial groups of eight records
    fn records() -> Vec<OccurrenceRecord> {
        let centers = [(0.0, 0.0), (40.0, 40.0), (-40.0, 40.0)];
        let mut out = Vec::new();
        for (g, (lat, lon)) in centers.iter().enumerate() {
            for i in 0..8 {
                let jitter = i as f64 * 0.2;
                out.push(
                    OccurrenceRecord::new(format!("{g}-{i}"))
                        .with(FeatureColumn::DecimalLatitude, lat + jitter)
                        .with(FeatureColumn::DecimalLongitude, lon - jitter * 0.5),
                );
            }
        }
        out
    }

    fn request(algorithm: &str) -> AnalysisRequest {
        AnalysisRequest::new(algorithm)
            .with_schema(schema())
            .with_config(quick_config())
            .with_params(ParamBag::new().with("random_state", 0))
    }

    #[test]
    fn test_sweep_finds_three_groups() {
        let result = run_pipeline(records(), Vec::new(), &request("kmeans")).unwrap();
        assert_eq!(result.len(), 24);
        assert_eq!(result.best_k, Some(3));
        assert_eq!(result.cluster_count(), 3);
    }

    #[test]
    fn test_explicit_k_bypasses_sweep() {
        let request = request("kmeans").with_n_clusters(4);
        let result = run_pipeline(records(), Vec::new(), &request).unwrap();
        assert_eq!(result.best_k, Some(4));
        let distinct: HashSet<_> = result.labels().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_hierarchical_alias_and_threshold() {
        let result = run_pipeline(records(), Vec::new(), &request("hierarquical")).unwrap();
        assert_eq!(result.best_k, Some(3));

        let threshold = request("hierarchical")
            .with_params(ParamBag::new().with("distance_threshold", 1.0).with("linkage", "single"));
        let result = run_pipeline(records(), Vec::new(), &threshold).unwrap();
        assert_eq!(result.best_k, Some(3));
        assert_eq!(result.noise_count(), 0);
    }

    #[test]
    fn test_dbscan_has_no_best_k() {
        let request = request("dbscan")
            .with_params(ParamBag::new().with("eps", 0.5).with("min_samples", 3))
            .with_n_clusters(5);
        let result = run_pipeline(records(), Vec::new(), &request).unwrap();
        assert_eq!(result.best_k, None);
        assert_eq!(result.cluster_count(), 3);
    }

    #[test]
    fn test_unknown_selector_fails_before_data() {
        let err = run_pipeline(Vec::new(), Vec::new(), &request("spectral")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_bad_params_fail_before_data() {
        let request = request("kmeans").with_params(ParamBag::new().with("init", "best"));
        let err = run_pipeline(Vec::new(), Vec::new(), &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_validate_request_checks_selector_then_params() {
        assert!(validate_request(&request("hierarchical")).is_ok());

        let err = validate_request(
            &request("spectral").with_params(ParamBag::new().with("init", "best")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);

        let bad = request("dbscan").with_params(ParamBag::new().with("min_samples", 0));
        assert_eq!(validate_request(&bad).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_too_few_records_for_sweep() {
        let few: Vec<_> = records().into_iter().take(6).collect();
        let err = run_pipeline(few, Vec::new(), &request("kmeans")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);
    }

    #[test]
    fn test_explicit_k_above_row_count() {
        let few: Vec<_> = records().into_iter().take(3).collect();
        let request = request("kmeans").with_n_clusters(5);
        let err = run_pipeline(few, Vec::new(), &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateData);
    }

    #[test]
    fn test_run_on_joined_matches_run() {
        let request = request("kmeans").with_n_clusters(3);
        let joined: Vec<JoinedRecord> = records()
            .into_iter()
            .map(|record| JoinedRecord { record, media: None })
            .collect();
        let a = run_on_joined(&joined, &request).unwrap();
        let b = run_pipeline(records(), Vec::new(), &request).unwrap();
        assert_eq!(a, b);
    }
}
