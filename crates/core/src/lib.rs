//! Biocluster Core - occurrence clustering pipeline
//!
//! Joins occurrence records with media links, standardizes the numeric
//! features, resolves a cluster count, dispatches to one of the registered
//! clustering strategies and lays the records out in two dimensions.

pub mod compose;
pub mod distance;
pub mod embedding;
pub mod join;
pub mod matrix;
pub mod normalize;
pub mod params;
pub mod pipeline;
pub mod selector;
pub mod silhouette;
pub mod strategy;

pub use compose::{compose, ClusterPoint, ClusterResult};
pub use distance::Metric;
pub use embedding::{embed, EmbeddingConfig};
pub use join::{join_records, JoinOutcome};
pub use matrix::FeatureMatrix;
pub use normalize::{standardize, ScalerStats, Standardized};
pub use params::ParamBag;
pub use pipeline::{
    run_on_joined, run_pipeline, validate_request, AnalysisRequest, Analyzer, PipelineConfig,
};
pub use selector::{select_cluster_count, SweepConfig, SweepOutcome, MAX_K, MIN_K};
pub use silhouette::silhouette_score;
pub use strategy::{
    ClusterCountMode, ClusteringStrategy, ConfiguredClustering, DbscanParams, DbscanStrategy,
    HierarchicalParams, HierarchicalStrategy, KMeansFit, KMeansParams, KMeansStrategy, Linkage,
    StrategyRegistry,
};
