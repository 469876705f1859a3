//! Held-out evaluation of trained models and the persisted metrics document.
//!
//! Curve conventions follow the usual scikit-learn definitions: the ROC curve
//! starts at (0, 0) and keeps only points where its slope changes; the
//! precision-recall curve is reported from full recall down to the closing
//! point (precision 1, recall 0).

use crate::models::ModelKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Number of importances kept per model.
pub const TOP_IMPORTANCES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&truth, &pred) in y_true.iter().zip(y_pred) {
            match (truth, pred) {
                (1, 1) => cm.tp += 1,
                (1, _) => cm.fn_ += 1,
                (_, 1) => cm.fp += 1,
                _ => cm.tn += 1,
            }
        }
        cm
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Cumulative false and true positive counts at each distinct score,
/// scanning from the highest score down.
fn binary_clf_curve(y_true: &[u8], scores: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fps = Vec::new();
    let mut tps = Vec::new();
    let (mut fp, mut tp) = (0.0, 0.0);
    for (position, &i) in order.iter().enumerate() {
        if y_true[i] == 1 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let boundary = order
            .get(position + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if boundary {
            fps.push(fp);
            tps.push(tp);
        }
    }
    (fps, tps)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
}

pub fn roc_curve(y_true: &[u8], scores: &[f64]) -> RocCurve {
    let (fps, tps) = binary_clf_curve(y_true, scores);
    if fps.is_empty() {
        return RocCurve::default();
    }

    // Drop points collinear with both neighbours
    let keep: Vec<usize> = (0..fps.len())
        .filter(|&i| {
            i == 0
                || i == fps.len() - 1
                || fps[i + 1] - 2.0 * fps[i] + fps[i - 1] != 0.0
                || tps[i + 1] - 2.0 * tps[i] + tps[i - 1] != 0.0
        })
        .collect();

    let total_fp = fps[fps.len() - 1];
    let total_tp = tps[tps.len() - 1];
    let scale = |v: f64, total: f64| if total > 0.0 { v / total } else { 0.0 };

    let mut curve = RocCurve {
        fpr: vec![0.0],
        tpr: vec![0.0],
    };
    for i in keep {
        curve.fpr.push(scale(fps[i], total_fp));
        curve.tpr.push(scale(tps[i], total_tp));
    }
    curve
}

/// Area under the ROC curve by the trapezoidal rule.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> f64 {
    let curve = roc_curve(y_true, scores);
    curve
        .fpr
        .windows(2)
        .zip(curve.tpr.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

pub fn precision_recall_curve(y_true: &[u8], scores: &[f64]) -> PrCurve {
    let (fps, tps) = binary_clf_curve(y_true, scores);
    let total_tp = tps.last().copied().unwrap_or(0.0);

    let mut curve = PrCurve::default();
    for i in (0..tps.len()).rev() {
        let predicted = tps[i] + fps[i];
        curve.precision.push(if predicted > 0.0 { tps[i] / predicted } else { 0.0 });
        curve.recall.push(if total_tp > 0.0 { tps[i] / total_tp } else { 0.0 });
    }
    curve.precision.push(1.0);
    curve.recall.push(0.0);
    curve
}

/// Average precision: recall-weighted mean of precision.
pub fn average_precision(y_true: &[u8], scores: &[f64]) -> f64 {
    let curve = precision_recall_curve(y_true, scores);
    curve
        .recall
        .windows(2)
        .zip(&curve.precision)
        .map(|(r, p)| (r[0] - r[1]) * p)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub roc_auc: f64,
    pub pr_auc: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curves {
    pub roc: RocCurve,
    pub pr: PrCurve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Largest `n` importances, highest first.
pub fn top_importances(
    columns: &[String],
    importances: &[f64],
    n: usize,
) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = columns
        .iter()
        .zip(importances)
        .map(|(feature, &importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSizes {
    pub total: usize,
    pub fraud: usize,
    pub non_fraud: usize,
}

/// Class balance of the (downsampled) training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub fraud_rate: f64,
    pub dataset_sizes: DatasetSizes,
    /// Share of non-fraud rows
    pub sampling_ratio: f64,
    pub trained_at: DateTime<Utc>,
}

impl TrainingStats {
    pub fn from_labels(labels: &[u8]) -> Self {
        let total = labels.len();
        let fraud = labels.iter().filter(|&&l| l == 1).count();
        Self {
            fraud_rate: ratio(fraud, total),
            dataset_sizes: DatasetSizes {
                total,
                fraud,
                non_fraud: total - fraud,
            },
            sampling_ratio: ratio(total - fraud, total),
            trained_at: Utc::now(),
        }
    }
}

/// Everything recorded about one model's held-out performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub metrics: ModelMetrics,
    pub curves: Curves,
    pub confusion_matrix: ConfusionMatrix,
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub training_stats: TrainingStats,
}

impl ModelReport {
    pub fn evaluate(
        y_true: &[u8],
        scores: &[f64],
        y_pred: &[u8],
        importance: Option<Vec<FeatureImportance>>,
        training_stats: TrainingStats,
    ) -> Self {
        let confusion_matrix = ConfusionMatrix::from_predictions(y_true, y_pred);
        Self {
            metrics: ModelMetrics {
                roc_auc: roc_auc(y_true, scores),
                pr_auc: average_precision(y_true, scores),
                precision: confusion_matrix.precision(),
                recall: confusion_matrix.recall(),
                f1: confusion_matrix.f1(),
            },
            curves: Curves {
                roc: roc_curve(y_true, scores),
                pr: precision_recall_curve(y_true, scores),
            },
            confusion_matrix,
            feature_importance: importance,
            training_stats,
        }
    }
}

/// Contents of `metrics.json`, keyed by model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsDocument {
    reports: BTreeMap<ModelKey, ModelReport>,
}

impl MetricsDocument {
    pub fn insert(&mut self, key: ModelKey, report: ModelReport) {
        self.reports.insert(key, report);
    }

    pub fn get(&self, key: ModelKey) -> Option<&ModelReport> {
        self.reports.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ModelKey> + '_ {
        self.reports.keys().copied()
    }

    /// Recorded importances of one model as a lookup table; empty when none.
    pub fn importance_map(&self, key: ModelKey) -> HashMap<String, f64> {
        self.get(key)
            .and_then(|r| r.feature_importance.as_ref())
            .map(|items| items.iter().map(|i| (i.feature.clone(), i.importance)).collect())
            .unwrap_or_default()
    }

    /// Training time, taken from the `xgb` report.
    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.get(ModelKey::Xgb).map(|r| r.training_stats.trained_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Y: [u8; 4] = [0, 0, 1, 1];
    const SCORES: [f64; 4] = [0.1, 0.4, 0.35, 0.8];

    #[test]
    fn test_roc_auc_matches_reference() {
        assert!((roc_auc(&Y, &SCORES) - 0.75).abs() < 1e-12);
        assert_eq!(roc_auc(&Y, &[0.1, 0.2, 0.8, 0.9]), 1.0);
    }

    #[test]
    fn test_roc_curve_points() {
        let curve = roc_curve(&Y, &SCORES);
        assert_eq!(curve.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert_eq!(curve.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_precision_recall_curve() {
        let curve = precision_recall_curve(&Y, &SCORES);
        assert_eq!(curve.recall, vec![1.0, 1.0, 0.5, 0.5, 0.0]);
        assert_eq!(curve.precision.last(), Some(&1.0));
        assert!((curve.precision[1] - 2.0 / 3.0).abs() < 1e-12);
        assert!((average_precision(&Y, &SCORES) - (0.5 * 2.0 / 3.0 + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_confusion_matrix_and_rates() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 0, 1]);
        assert_eq!(cm, ConfusionMatrix { tn: 1, fp: 1, fn_: 1, tp: 2 });
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.f1() - 2.0 / 3.0).abs() < 1e-12);

        let none = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0]);
        assert_eq!(none.precision(), 0.0);
        assert_eq!(none.f1(), 0.0);
        assert_eq!(serde_json::to_value(none).unwrap()["fn"], 1);
    }

    #[test]
    fn test_top_importances() {
        let columns: Vec<String> = (0..25).map(|i| format!("f{}", i)).collect();
        let importances: Vec<f64> = (0..25).map(|i| i as f64).collect();
        let top = top_importances(&columns, &importances, TOP_IMPORTANCES);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].feature, "f24");
        assert!(top.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_document_lookups() {
        let stats = TrainingStats::from_labels(&[0, 0, 0, 1]);
        assert_eq!(stats.fraud_rate, 0.25);
        assert_eq!(stats.sampling_ratio, 0.75);

        let report = ModelReport::evaluate(
            &Y,
            &SCORES,
            &[0, 0, 0, 1],
            Some(vec![FeatureImportance {
                feature: "TransactionAmt".into(),
                importance: 0.7,
            }]),
            stats.clone(),
        );
        let mut doc = MetricsDocument::default();
        doc.insert(ModelKey::Xgb, report);

        assert_eq!(doc.importance_map(ModelKey::Xgb).get("TransactionAmt"), Some(&0.7));
        assert!(doc.importance_map(ModelKey::Stack).is_empty());
        assert_eq!(doc.trained_at(), Some(stats.trained_at));

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["xgb"]["metrics"]["roc_auc"].is_number());
        assert!(json["xgb"]["training_stats"]["dataset_sizes"]["total"].is_number());
    }
}
