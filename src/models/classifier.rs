//! Uniform interface over the learners used by the ensemble

use crate::error::{Error, Result};
use ndarray::ArrayView2;

/// A binary classifier trained on standardized feature matrices.
pub trait Classifier {
    /// Fit on `x` (rows × features) with labels in `{0, 1}`.
    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8]) -> Result<()>;

    /// Probability of the positive (fraud) class for every row.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64>;

    /// Normalized per-feature importances, if the learner defines them.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Reject empty, mismatched or single-class training data.
pub fn validate_training_data(x: ArrayView2<f64>, y: &[u8]) -> Result<(usize, usize)> {
    if x.nrows() == 0 {
        return Err(Error::Training("no training rows".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(Error::Training(format!(
            "{} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    let positives = y.iter().filter(|&&label| label == 1).count();
    let negatives = y.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(Error::Training(
            "training labels must contain both classes".to_string(),
        ));
    }
    Ok((negatives, positives))
}
