//! Statistics learned once at training time and replayed at inference time

use crate::error::{Error, Result};
use crate::frame;
use ndarray::{Array2, ArrayView2, Axis};
use polars::prelude::Column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Code assigned to a categorical value absent from the training vocabulary.
///
/// Trained class indices are always `>= 0`.
pub const UNSEEN_CATEGORY_CODE: i64 = -1;

/// What replay-mode imputation does for a column with no recorded median.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MedianFallback {
    /// Use the median of the column within the batch being transformed.
    #[default]
    LocalBatch,
    /// Use a fixed value.
    Constant(f64),
}

impl MedianFallback {
    pub fn resolve(&self, column: &Column) -> f64 {
        match self {
            MedianFallback::LocalBatch => frame::median(column),
            MedianFallback::Constant(value) => *value,
        }
    }
}

/// Mean and scale of one standardized feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: f64,
    pub scale: f64,
}

/// Per-feature standardization, `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    pub params: Vec<ScalerParams>,
}

impl StandardScaler {
    /// Scales below this are treated as zero variance and replaced by 1.0.
    pub const MIN_SCALE: f64 = 1e-12;

    /// Fit mean and population standard deviation per column.
    pub fn fit(values: ArrayView2<f64>) -> Self {
        let params = values
            .axis_iter(Axis(1))
            .map(|column| {
                let n = column.len().max(1) as f64;
                let mean = column.sum() / n;
                let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                let scale = if std.is_finite() && std >= Self::MIN_SCALE { std } else { 1.0 };
                ScalerParams { mean, scale }
            })
            .collect();
        Self { params }
    }

    /// Standardize in place.
    pub fn transform(&self, values: &mut Array2<f64>) -> Result<()> {
        if values.ncols() != self.params.len() {
            return Err(Error::Internal(format!(
                "scaler fitted on {} features, got {}",
                self.params.len(),
                values.ncols()
            )));
        }
        for (mut column, params) in values.axis_iter_mut(Axis(1)).zip(&self.params) {
            column.mapv_inplace(|v| (v - params.mean) / params.scale);
        }
        Ok(())
    }
}

/// Frozen preprocessing state shared by every inference call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureState {
    /// Training medians of every numeric input column
    pub medians: BTreeMap<String, f64>,
    /// Known classes per categorical column, in code order
    pub categorical_vocabularies: BTreeMap<String, Vec<String>>,
    /// Text columns seen at training time
    pub categorical_columns: Vec<String>,
    /// One entry per `feature_columns` element
    pub scaler: StandardScaler,
    /// Authoritative model input order
    pub feature_columns: Vec<String>,
}

impl FeatureState {
    pub fn median(&self, column: &str) -> Option<f64> {
        self.medians.get(column).copied()
    }

    pub fn vocabulary(&self, column: &str) -> Option<&[String]> {
        self.categorical_vocabularies.get(column).map(Vec::as_slice)
    }

    pub fn is_categorical(&self, column: &str) -> bool {
        self.categorical_vocabularies.contains_key(column)
            || self.categorical_columns.iter().any(|c| c == column)
    }

    /// Encode a single value with the recorded vocabulary.
    pub fn encode(&self, column: &str, value: &str) -> i64 {
        self.vocabulary(column)
            .and_then(|classes| classes.iter().position(|c| c == value))
            .map_or(UNSEEN_CATEGORY_CODE, |code| code as i64)
    }

    pub fn feature_count(&self) -> usize {
        self.feature_columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scaler_zero_variance_stays_finite() {
        let values = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let scaler = StandardScaler::fit(values.view());
        assert_eq!(scaler.params[1].scale, 1.0);

        let mut scaled = values.clone();
        scaler.transform(&mut scaled).unwrap();
        assert!(scaled.iter().all(|v| v.is_finite()));
        assert_eq!(scaled[[0, 1]], 0.0);
        assert!((scaled.column(0).sum()).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_rejects_width_mismatch() {
        let scaler = StandardScaler::fit(array![[1.0, 2.0]].view());
        let mut values = array![[1.0, 2.0, 3.0]];
        assert!(scaler.transform(&mut values).is_err());
    }

    #[test]
    fn test_encode_unseen_value() {
        let mut state = FeatureState::default();
        state
            .categorical_vocabularies
            .insert("card4".to_string(), vec!["visa".to_string(), "mastercard".to_string()]);

        assert_eq!(state.encode("card4", "mastercard"), 1);
        assert_eq!(state.encode("card4", "discover"), UNSEEN_CATEGORY_CODE);
        assert_eq!(state.encode("DeviceInfo", "iOS"), UNSEEN_CATEGORY_CODE);
    }

    #[test]
    fn test_median_fallback_policies() {
        let column = frame::float_column("addr1", vec![Some(1.0), None, Some(9.0), Some(4.0)]);
        assert_eq!(MedianFallback::LocalBatch.resolve(&column), 4.0);
        let even = frame::float_column("addr1", vec![Some(4.0), Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(MedianFallback::LocalBatch.resolve(&even), 2.5);
        assert_eq!(MedianFallback::Constant(-1.0).resolve(&column), -1.0);
    }
}
