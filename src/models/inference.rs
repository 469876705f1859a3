//! Scoring of uploaded batches against a trained bundle

use crate::error::{Error, Result};
use crate::features::{self, FeatureMatrix};
use crate::models::ensemble::{classify, ModelKey, BASE_MODEL_THRESHOLD};
use crate::models::loader::ArtifactBundle;
use crate::schema;
use crate::types::{PredictionRow, PredictionSummary, TransactionRecord};
use polars::prelude::DataFrame;
use std::time::Instant;
use tracing::{debug, info};

/// Output of one scoring call, ready to be cached.
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub rows: Vec<PredictionRow>,
    pub features: FeatureMatrix,
    /// Threshold actually used to binarize
    pub threshold: f64,
}

impl ScoredBatch {
    pub fn summary(&self, key: ModelKey) -> PredictionSummary {
        PredictionSummary::from_rows(&self.rows, self.threshold, key.as_str())
    }
}

pub fn validate_threshold(threshold: f64) -> Result<f64> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(Error::InvalidUpload(format!(
            "threshold must be between 0 and 1, got {}",
            threshold
        )))
    }
}

/// Threshold a model binarizes with. Only models that support a threshold
/// validate the requested one; base models always use [`BASE_MODEL_THRESHOLD`].
pub fn effective_threshold(key: ModelKey, requested: f64) -> Result<f64> {
    if key.supports_threshold() {
        validate_threshold(requested)
    } else {
        Ok(BASE_MODEL_THRESHOLD)
    }
}

/// Transform `raw` with the bundle's feature state and score it with one model.
pub fn score_upload(
    bundle: &ArtifactBundle,
    key: ModelKey,
    raw: &DataFrame,
    threshold: f64,
) -> Result<ScoredBatch> {
    let start = Instant::now();
    let member = bundle.models.member(key)?;
    let threshold = effective_threshold(key, threshold)?;

    let alignment = schema::reconcile(raw, &bundle.feature_state);
    if alignment.has_drift() {
        debug!(
            missing = alignment.missing_required.len(),
            unseen = ?alignment.unseen_categories,
            "Upload schema differs from training"
        );
    }

    let features = features::transform(raw, &bundle.feature_state)?;
    let probabilities = member.predict_proba(&features);
    let labels = classify(key, &probabilities, threshold);

    let rows: Vec<PredictionRow> = probabilities
        .iter()
        .zip(&labels)
        .enumerate()
        .map(|(i, (&proba, &pred_label))| PredictionRow {
            row_id: i.to_string(),
            transaction_id: TransactionRecord::new(raw, i).and_then(|r| r.transaction_id()),
            proba,
            pred_label,
        })
        .collect();

    let flagged = labels.iter().filter(|&&l| l == 1).count();
    info!(
        model = %key,
        rows = rows.len(),
        flagged,
        threshold,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Scored upload"
    );

    Ok(ScoredBatch {
        rows,
        features,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_threshold() {
        assert_eq!(validate_threshold(0.0).unwrap(), 0.0);
        assert_eq!(validate_threshold(1.0).unwrap(), 1.0);
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(-0.1).is_err());
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_base_models_ignore_requested_threshold() {
        for key in [ModelKey::Xgb, ModelKey::Cat] {
            assert_eq!(effective_threshold(key, 1.5).unwrap(), BASE_MODEL_THRESHOLD);
            assert_eq!(effective_threshold(key, f64::NAN).unwrap(), BASE_MODEL_THRESHOLD);
        }
        assert_eq!(effective_threshold(ModelKey::Stack, 0.3).unwrap(), 0.3);
        assert!(matches!(
            effective_threshold(ModelKey::Stack, 1.5),
            Err(Error::InvalidUpload(_))
        ));
    }
}
