//! Feature engineering shared by training and inference.
//!
//! Training runs [`fit_transform`] once and persists the resulting
//! [`FeatureState`]; every inference call replays it with [`transform`], so
//! both sides produce matrices with identical columns in identical order.

pub mod pipeline;
pub mod state;
pub mod steps;

pub use pipeline::{fit_transform, transform, transform_with};
pub use state::{FeatureState, MedianFallback, StandardScaler, UNSEEN_CATEGORY_CODE};

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1};

/// Dense model input: one row per transaction, one column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(Error::Internal(format!(
                "{} column names for {} feature columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_rows()).then(|| self.values.row(index))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of a named feature in one row.
    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let column = self.column_index(name)?;
        (row < self.n_rows()).then(|| self.values[[row, column]])
    }
}
