//! Common types and errors for occurrence clustering

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Analysis errors surfaced to callers of the pipeline
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Degenerate data: {0}")]
    DegenerateData(String),

    #[error("Numeric failure: {0}")]
    NumericFailure(String),

    #[error("Cluster-count sweep exceeded its budget of {0:?}")]
    Timeout(Duration),
}

/// Coarse classification of an [`AnalysisError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedAlgorithm,
    DegenerateData,
    NumericFailure,
    Timeout,
}

/// Serializable `{kind, message}` view of an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl AnalysisError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::InvalidInput(_) => ErrorKind::InvalidInput,
            AnalysisError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            AnalysisError::DegenerateData(_) => ErrorKind::DegenerateData,
            AnalysisError::NumericFailure(_) => ErrorKind::NumericFailure,
            AnalysisError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// GBIF occurrence identifier (`gbifID`), kept in its textual form
pub type RecordId = String;

/// Numeric occurrence columns understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureColumn {
    #[serde(rename = "individualCount")]
    IndividualCount,
    #[serde(rename = "decimalLatitude")]
    DecimalLatitude,
    #[serde(rename = "decimalLongitude")]
    DecimalLongitude,
    #[serde(rename = "depth")]
    Depth,
    #[serde(rename = "taxonKey")]
    TaxonKey,
    #[serde(rename = "kingdomKey")]
    KingdomKey,
    #[serde(rename = "phylumKey")]
    PhylumKey,
    #[serde(rename = "familyKey")]
    FamilyKey,
    #[serde(rename = "genusKey")]
    GenusKey,
}

impl FeatureColumn {
    pub const COUNT: usize = 9;

    /// All columns in export order
    pub const ALL: [FeatureColumn; FeatureColumn::COUNT] = [
        FeatureColumn::IndividualCount,
        FeatureColumn::DecimalLatitude,
        FeatureColumn::DecimalLongitude,
        FeatureColumn::Depth,
        FeatureColumn::TaxonKey,
        FeatureColumn::KingdomKey,
        FeatureColumn::PhylumKey,
        FeatureColumn::FamilyKey,
        FeatureColumn::GenusKey,
    ];

    /// Column header as it appears in GBIF exports
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::IndividualCount => "individualCount",
            FeatureColumn::DecimalLatitude => "decimalLatitude",
            FeatureColumn::DecimalLongitude => "decimalLongitude",
            FeatureColumn::Depth => "depth",
            FeatureColumn::TaxonKey => "taxonKey",
            FeatureColumn::KingdomKey => "kingdomKey",
            FeatureColumn::PhylumKey => "phylumKey",
            FeatureColumn::FamilyKey => "familyKey",
            FeatureColumn::GenusKey => "genusKey",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        FeatureColumn::ALL
            .iter()
            .copied()
            .find(|c| c.name() == trimmed)
            .ok_or_else(|| AnalysisError::InvalidInput(format!("Unknown feature column: {s:?}")))
    }
}

/// Ordered list of required feature columns shared by every pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            columns: FeatureColumn::ALL.to_vec(),
        }
    }
}

impl FeatureSchema {
    /// Create a schema, rejecting empty or repeated column lists
    pub fn new(columns: Vec<FeatureColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "Feature schema must name at least one column".to_string(),
            ));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(AnalysisError::InvalidInput(format!(
                    "Feature column listed twice: {column}"
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Parse a schema from GBIF column headers
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One occurrence observation with optional numeric features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub id: RecordId,
    values: [Option<f64>; FeatureColumn::COUNT],
}

impl OccurrenceRecord {
    /// Create a record with every feature missing
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            values: [None; FeatureColumn::COUNT],
        }
    }

    /// Builder-style setter
    #[must_use]
    pub fn with(mut self, column: FeatureColumn, value: f64) -> Self {
        self.values[column.slot()] = Some(value);
        self
    }

    pub fn set(&mut self, column: FeatureColumn, value: Option<f64>) {
        self.values[column.slot()] = value;
    }

    #[must_use]
    pub fn get(&self, column: FeatureColumn) -> Option<f64> {
        self.values[column.slot()]
    }

    /// Feature vector in schema order, or `None` when any required value is
    /// missing or non-finite
    #[must_use]
    pub fn features(&self, schema: &FeatureSchema) -> Option<Vec<f64>> {
        schema
            .columns()
            .iter()
            .map(|&c| self.get(c).filter(|v| v.is_finite()))
            .collect()
    }
}

/// Auxiliary media link for an occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLink {
    pub id: RecordId,
    pub reference: String,
}

impl MediaLink {
    pub fn new(id: impl Into<RecordId>, reference: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference: reference.into(),
        }
    }
}

/// Occurrence record after the media join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub record: OccurrenceRecord,
    pub media: Option<String>,
}

/// Cluster assignment for one record
///
/// Serialized as the cluster index, or `-1` for noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterLabel {
    Cluster(usize),
    Noise,
}

impl ClusterLabel {
    pub const NOISE_SENTINEL: i64 = -1;

    #[must_use]
    pub fn is_noise(self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    #[must_use]
    pub fn index(self) -> Option<usize> {
        match self {
            ClusterLabel::Cluster(i) => Some(i),
            ClusterLabel::Noise => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            ClusterLabel::Cluster(i) => i as i64,
            ClusterLabel::Noise => Self::NOISE_SENTINEL,
        }
    }
}

impl From<usize> for ClusterLabel {
    fn from(index: usize) -> Self {
        ClusterLabel::Cluster(index)
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Cluster(i) => write!(f, "{i}"),
            ClusterLabel::Noise => f.write_str("noise"),
        }
    }
}

impl Serialize for ClusterLabel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for ClusterLabel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            Self::NOISE_SENTINEL => Ok(ClusterLabel::Noise),
            i if i >= 0 => Ok(ClusterLabel::Cluster(i as usize)),
            other => Err(serde::de::Error::custom(format!(
                "invalid cluster label: {other}"
            ))),
        }
    }
}
