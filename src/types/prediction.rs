//! Prediction results returned by the scoring endpoint

use serde::{Deserialize, Serialize};

/// Score for one uploaded row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// Position of the row in the upload, as a string
    pub row_id: String,
    /// Uploaded transaction identifier, when the upload carried one
    #[serde(rename = "TransactionID")]
    pub transaction_id: Option<String>,
    /// Fraud probability in `[0, 1]`
    pub proba: f64,
    /// 1 = fraud
    pub pred_label: u8,
}

/// Batch-level counts for one prediction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total: usize,
    pub fraud_count: usize,
    pub non_fraud_count: usize,
    pub fraud_rate: f64,
    /// Threshold actually applied (0.5 for base models)
    pub threshold: f64,
    pub model: String,
}

impl PredictionSummary {
    pub fn from_rows(rows: &[PredictionRow], threshold: f64, model: &str) -> Self {
        let total = rows.len();
        let fraud_count = rows.iter().filter(|r| r.pred_label == 1).count();
        let fraud_rate = if total > 0 {
            fraud_count as f64 / total as f64
        } else {
            0.0
        };

        Self {
            total,
            fraud_count,
            non_fraud_count: total - fraud_count,
            fraud_rate,
            threshold,
            model: model.to_string(),
        }
    }
}

/// Body of a successful prediction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Identifier of the cached batch, usable by follow-up explanation calls
    pub batch_id: String,
    pub summary: PredictionSummary,
    pub rows: Vec<PredictionRow>,
}
