//! Biocluster - unsupervised clustering of biodiversity occurrence records
//!
//! Facade over the workspace crates:
//! - [`common`]: data model and error types
//! - [`analysis`]: join, standardization, cluster-count sweep, strategies, layout
//! - [`ingestion`]: GBIF tab-delimited export readers

pub use biocluster_common as common;
pub use biocluster_core as analysis;
pub use biocluster_ingestion as ingestion;

pub use biocluster_common::{
    AnalysisError, ClusterLabel, ErrorKind, FeatureColumn, FeatureSchema, JoinedRecord, MediaLink,
    OccurrenceRecord, Result,
};
pub use biocluster_core::{
    run_on_joined, run_pipeline, validate_request, AnalysisRequest, Analyzer, ClusterPoint,
    ClusterResult, ParamBag, PipelineConfig,
};
