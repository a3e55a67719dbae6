//! Feature matrix shared by every pipeline stage

use biocluster_common::{AnalysisError, FeatureColumn, FeatureSchema, JoinedRecord, Result};
use ndarray::{Array2, ArrayView1};
use std::collections::HashSet;

/// Row-per-record numeric features with a named, fixed column order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Array2<f64>,
    schema: FeatureSchema,
}

impl FeatureMatrix {
    pub fn new(data: Array2<f64>, schema: FeatureSchema) -> Result<Self> {
        if data.ncols() != schema.len() {
            return Err(AnalysisError::InvalidInput(format!(
                "Matrix has {} columns but schema names {}",
                data.ncols(),
                schema.len()
            )));
        }
        Ok(Self { data, schema })
    }

    /// Extract features from joined records, in record order
    ///
    /// Every record must carry every schema column; the joiner guarantees this
    /// for its own output.
    pub fn from_joined(records: &[JoinedRecord], schema: &FeatureSchema) -> Result<Self> {
        let mut flat = Vec::with_capacity(records.len() * schema.len());
        for joined in records {
            let row = joined.record.features(schema).ok_or_else(|| {
                AnalysisError::InvalidInput(format!(
                    "Record {} is missing a required feature column",
                    joined.record.id
                ))
            })?;
            flat.extend(row);
        }

        let data = Array2::from_shape_vec((records.len(), schema.len()), flat)
            .map_err(|e| AnalysisError::InvalidInput(format!("Failed to shape features: {e}")))?;

        Self::new(data, schema.clone())
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Look up a column by identity rather than position
    pub fn column(&self, column: FeatureColumn) -> Option<ArrayView1<'_, f64>> {
        self.schema
            .columns()
            .iter()
            .position(|&c| c == column)
            .map(|idx| self.data.column(idx))
    }

    /// Replace the values while keeping the column identity
    pub fn with_data(&self, data: Array2<f64>) -> Result<Self> {
        if data.dim() != self.data.dim() {
            return Err(AnalysisError::NumericFailure(format!(
                "Shape changed from {:?} to {:?}",
                self.data.dim(),
                data.dim()
            )));
        }
        Ok(Self {
            data,
            schema: self.schema.clone(),
        })
    }

    /// Number of distinct rows (bitwise, with `-0.0 == 0.0`)
    pub fn distinct_rows(&self) -> usize {
        distinct_rows(&self.data)
    }
}

pub(crate) fn distinct_rows(data: &Array2<f64>) -> usize {
    let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(data.nrows());
    for row in data.rows() {
        let key = row
            .iter()
            .map(|&v| if v == 0.0 { 0u64 } else { v.to_bits() })
            .collect();
        seen.insert(key);
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::OccurrenceRecord;
    use ndarray::array;

    fn joined(id: &str, count: f64, depth: f64) -> JoinedRecord {
        JoinedRecord {
            record: OccurrenceRecord::new(id)
                .with(FeatureColumn::IndividualCount, count)
                .with(FeatureColumn::Depth, depth),
            media: None,
        }
    }

    #[test]
    fn test_from_joined_keeps_order_and_columns() {
        let schema = FeatureSchema::from_names(["depth", "individualCount"]).unwrap();
        let records = vec![joined("a", 1.0, 10.0), joined("b", 2.0, 20.0)];
        let matrix = FeatureMatrix::from_joined(&records, &schema).unwrap();

        assert_eq!(matrix.data(), &array![[10.0, 1.0], [20.0, 2.0]]);
        let counts = matrix.column(FeatureColumn::IndividualCount).unwrap();
        assert_eq!(counts.to_vec(), vec![1.0, 2.0]);
        assert!(matrix.column(FeatureColumn::GenusKey).is_none());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let schema = FeatureSchema::from_names(["depth"]).unwrap();
        assert!(FeatureMatrix::new(array![[1.0, 2.0]], schema).is_err());
    }

    #[test]
    fn test_distinct_rows() {
        let data = array![[1.0, 0.0], [1.0, -0.0], [2.0, 0.0]];
        assert_eq!(distinct_rows(&data), 2);
    }
}
