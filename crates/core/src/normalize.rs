//! Column-wise standardization (zero mean, unit variance)

use crate::matrix::FeatureMatrix;
use biocluster_common::{AnalysisError, Result};
use ndarray::{Array1, Axis};
use tracing::{debug, warn};

/// Fitted per-column statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerStats {
    pub mean: Array1<f64>,
    /// Population standard deviation; `1.0` for constant columns
    pub scale: Array1<f64>,
    /// Columns treated as constant (zeroed after centering)
    pub constant: Vec<bool>,
}

/// Standardized features together with the statistics used
#[derive(Debug, Clone)]
pub struct Standardized {
    pub matrix: FeatureMatrix,
    pub stats: ScalerStats,
}

/// Rescale every column to zero mean and unit population variance
///
/// A constant column has no spread to divide by; it is centered and comes out
/// as all zeros.
///
/// # Errors
/// - `InvalidInput` on an empty matrix
/// - `NumericFailure` when the input or the scaled output is not finite
pub fn standardize(matrix: FeatureMatrix) -> Result<Standardized> {
    let n = matrix.nrows();
    if n == 0 {
        return Err(AnalysisError::InvalidInput(
            "Cannot standardize an empty feature matrix".to_string(),
        ));
    }
    if matrix.data().iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Feature matrix contains non-finite values".to_string(),
        ));
    }

    let data = matrix.data();
    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| AnalysisError::NumericFailure("Column mean undefined".to_string()))?;
    let variance = data.var_axis(Axis(0), 0.0);

    let mut scale = variance.mapv(f64::sqrt);
    let mut constant = vec![false; matrix.ncols()];
    for (idx, s) in scale.iter_mut().enumerate() {
        let tolerance = 10.0 * f64::EPSILON * mean[idx].abs().max(1.0);
        if *s <= tolerance {
            *s = 1.0;
            constant[idx] = true;
        }
    }

    let mut scaled = (data - &mean) / &scale;
    for (idx, is_constant) in constant.iter().enumerate() {
        if *is_constant {
            let name = matrix.schema().columns()[idx];
            warn!("Column {} is constant; standardized to zeros", name);
            scaled.column_mut(idx).fill(0.0);
        }
    }

    if scaled.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NumericFailure(
            "Standardization produced non-finite values".to_string(),
        ));
    }

    debug!("Standardized {} rows x {} columns", n, matrix.ncols());

    Ok(Standardized {
        matrix: matrix.with_data(scaled)?,
        stats: ScalerStats {
            mean,
            scale,
            constant,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::{ErrorKind, FeatureColumn, FeatureSchema};
    use ndarray::array;

    fn schema() -> FeatureSchema {
        FeatureSchema::from_names(["individualCount", "depth", "taxonKey"]).unwrap()
    }

    #[test]
    fn test_columns_have_zero_mean_unit_variance() {
        let data = array![
            [1.0, 10.0, 7.0],
            [2.0, 30.0, 7.0],
            [3.0, 20.0, 7.0],
            [10.0, 0.0, 7.0]
        ];
        let out = standardize(FeatureMatrix::new(data, schema()).unwrap()).unwrap();
        let scaled = out.matrix.data();

        for col in 0..2 {
            let column = scaled.column(col);
            let mean = column.mean().unwrap();
            let var = column.var(0.0);
            assert!(mean.abs() < 1e-12, "column {col} mean {mean}");
            assert!((var - 1.0).abs() < 1e-12, "column {col} var {var}");
        }
        assert!(scaled.column(2).iter().all(|&v| v == 0.0));
        assert_eq!(out.stats.constant, vec![false, false, true]);
        assert_eq!(out.stats.scale[2], 1.0);
    }

    #[test]
    fn test_column_identity_preserved() {
        let data = array![[1.0, 100.0, 1.0], [3.0, 300.0, 2.0]];
        let out = standardize(FeatureMatrix::new(data, schema()).unwrap()).unwrap();
        let depth = out.matrix.column(FeatureColumn::Depth).unwrap();
        assert_eq!(depth.to_vec(), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let data = array![[1.0, f64::INFINITY, 1.0], [2.0, 3.0, 4.0]];
        let err = standardize(FeatureMatrix::new(data, schema()).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NumericFailure);
    }

    #[test]
    fn test_single_row_becomes_zeros() {
        let data = array![[5.0, 6.0, 7.0]];
        let out = standardize(FeatureMatrix::new(data, schema()).unwrap()).unwrap();
        assert!(out.matrix.data().iter().all(|&v| v == 0.0));
    }
}
