//! Shared fixtures for integration tests

#![allow(dead_code)]

use biocluster::{
    analysis::EmbeddingConfig, AnalysisRequest, FeatureColumn, OccurrenceRecord, PipelineConfig,
};

/// Record with every feature column filled
pub fn record(
    id: &str,
    count: f64,
    lat: f64,
    lon: f64,
    depth: f64,
    genus: f64,
) -> OccurrenceRecord {
    OccurrenceRecord::new(id)
        .with(FeatureColumn::IndividualCount, count)
        .with(FeatureColumn::DecimalLatitude, lat)
        .with(FeatureColumn::DecimalLongitude, lon)
        .with(FeatureColumn::Depth, depth)
        .with(FeatureColumn::TaxonKey, genus * 10.0 + 1.0)
        .with(FeatureColumn::KingdomKey, 1.0)
        .with(FeatureColumn::PhylumKey, 44.0)
        .with(FeatureColumn::FamilyKey, 2_000.0 + genus)
        .with(FeatureColumn::GenusKey, genus)
}

/// Three reef sites with distinct depth and genus profiles, eight records each
pub fn reef_survey() -> Vec<OccurrenceRecord> {
    let sites = [
        (-17.0, 146.0, 5.0, 100.0),
        (-12.0, 130.0, 40.0, 200.0),
        (-30.0, 153.0, 80.0, 300.0),
    ];
    let mut records = Vec::new();
    for (s, &(lat, lon, depth, genus)) in sites.iter().enumerate() {
        for i in 0..8 {
            let jitter = i as f64 * 0.05;
            records.push(record(
                &format!("{}", 1_000 + s * 100 + i),
                2.0,
                lat + jitter,
                lon - jitter,
                depth + i as f64 * 0.5,
                genus,
            ));
        }
    }
    records
}

/// Short layout optimization keeps the suite fast
pub fn quick_config() -> PipelineConfig {
    PipelineConfig {
        embedding: EmbeddingConfig {
            n_epochs: Some(40),
            ..EmbeddingConfig::default()
        },
        ..PipelineConfig::default()
    }
}

pub fn request(algorithm: &str) -> AnalysisRequest {
    AnalysisRequest::new(algorithm).with_config(quick_config())
}
