//! Offline training run: sampling, feature fitting, model fitting and evaluation.

use crate::config::{ArtifactsConfig, TrainingConfig};
use crate::eda::{training_eda, TrainingEda};
use crate::error::{Error, Result};
use crate::features::{fit_transform, steps, FeatureMatrix};
use crate::frame;
use crate::metrics::{
    top_importances, MetricsDocument, ModelReport, TrainingStats, TOP_IMPORTANCES,
};
use crate::models::boosting::{BoostingParams, GradientBoostedTrees};
use crate::models::ensemble::{classify, EnsembleMember, ModelEnsemble, ModelKey};
use crate::models::loader::{write_json, ArtifactBundle};
use crate::models::{Classifier, StackedEnsemble};
use crate::sampling::{downsample_non_fraud, stratified_split};
use crate::types::transaction::{IS_FRAUD, TRANSACTION_ID};
use ndarray::{Array2, Axis};
use polars::prelude::DataFrame;
use std::time::Instant;
use tracing::{info, warn};

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ArtifactBundle,
    pub metrics: MetricsDocument,
    pub eda: TrainingEda,
}

impl TrainingOutcome {
    /// Write the bundle, metrics and training EDA into the results directory.
    pub fn save(&self, artifacts: &ArtifactsConfig) -> Result<()> {
        self.bundle.save(artifacts.bundle_path())?;
        write_json(artifacts.metrics_path(), &self.metrics)?;
        write_json(artifacts.training_eda_path(), &self.eda)?;
        Ok(())
    }
}

/// Load the raw transaction and identity files and left-join them.
pub fn load_training_frame(config: &TrainingConfig) -> Result<DataFrame> {
    let transactions = frame::read_csv_path(config.transaction_path())?;
    let identity = frame::read_csv_path(config.identity_path())?;
    info!(
        transactions = transactions.height(),
        identity = identity.height(),
        "Loaded raw training data"
    );
    frame::left_join(&transactions, &identity, TRANSACTION_ID)
}

fn labels(df: &DataFrame) -> Result<Vec<u8>> {
    frame::numeric(df, IS_FRAUD)?
        .into_iter()
        .enumerate()
        .map(|(row, label)| match label {
            Some(v) if v == 1.0 => Ok(1),
            Some(v) if v == 0.0 => Ok(0),
            _ => Err(Error::Training(format!("row {} has no 0/1 label", row))),
        })
        .collect()
}

struct HeldOut<'a> {
    x: Array2<f64>,
    y: Vec<u8>,
    matrix: &'a FeatureMatrix,
    stats: &'a TrainingStats,
}

impl HeldOut<'_> {
    fn report(&self, key: ModelKey, model: &dyn Classifier, threshold: f64) -> ModelReport {
        let scores = model.predict_proba(self.x.view());
        let predictions = classify(key, &scores, threshold);
        let importance = model
            .feature_importances()
            .map(|weights| top_importances(self.matrix.columns(), &weights, TOP_IMPORTANCES));
        let report = ModelReport::evaluate(
            &self.y,
            &scores,
            &predictions,
            importance,
            self.stats.clone(),
        );
        info!(
            model = %key,
            roc_auc = report.metrics.roc_auc,
            pr_auc = report.metrics.pr_auc,
            f1 = report.metrics.f1,
            "Evaluated model"
        );
        report
    }
}

/// Run the full training pipeline on a merged raw frame.
pub fn train(raw: &DataFrame, config: &TrainingConfig) -> Result<TrainingOutcome> {
    let start = Instant::now();
    let selected = steps::select_columns(raw, true)?;
    steps::validate_required(&selected)?;

    let all_labels = labels(&selected)?;
    let rows = downsample_non_fraud(&all_labels, config.non_fraud_fraction, config.seed)?;
    let sampled = frame::take_rows(&selected, &rows)?;
    let sampled_labels: Vec<u8> = rows.iter().map(|&r| all_labels[r]).collect();
    info!(
        raw_rows = raw.height(),
        sampled_rows = sampled.height(),
        fraud = sampled_labels.iter().filter(|&&l| l == 1).count(),
        "Downsampled non-fraud rows"
    );

    let mut eda_frame = sampled.clone();
    steps::add_hour(&mut eda_frame)?;
    let eda = training_eda(&eda_frame);

    let (matrix, feature_state) = fit_transform(&sampled)?;
    let split = stratified_split(&sampled_labels, config.test_size, config.seed)?;
    let x_train = matrix.values().select(Axis(0), &split.train);
    let y_train: Vec<u8> = split.train.iter().map(|&r| sampled_labels[r]).collect();

    let stats = TrainingStats::from_labels(&sampled_labels);
    let held_out = HeldOut {
        x: matrix.values().select(Axis(0), &split.test),
        y: split.test.iter().map(|&r| sampled_labels[r]).collect(),
        matrix: &matrix,
        stats: &stats,
    };

    let params_a = BoostingParams::config_a(config.seed).with_estimators(config.n_estimators);
    let params_b = BoostingParams::config_b(config.seed).with_estimators(config.n_estimators);

    let mut models = ModelEnsemble::new();
    let mut metrics = MetricsDocument::default();

    let mut boosted_a = GradientBoostedTrees::new(params_a.clone());
    boosted_a.fit(x_train.view(), &y_train)?;
    let report = held_out.report(ModelKey::Xgb, &boosted_a, config.stack_threshold);
    metrics.insert(ModelKey::Xgb, report);
    models.insert(ModelKey::Xgb, EnsembleMember::BoostedA(boosted_a));

    let mut boosted_b = GradientBoostedTrees::new(params_b.clone());
    boosted_b.fit(x_train.view(), &y_train)?;
    let report = held_out.report(ModelKey::Cat, &boosted_b, config.stack_threshold);
    metrics.insert(ModelKey::Cat, report);
    models.insert(ModelKey::Cat, EnsembleMember::BoostedB(boosted_b));

    let mut stack = StackedEnsemble::new(params_a, params_b, config.stack_folds, config.seed);
    match stack.fit(x_train.view(), &y_train) {
        Ok(()) => {
            let report = held_out.report(ModelKey::Stack, &stack, config.stack_threshold);
            metrics.insert(ModelKey::Stack, report);
            models.insert(ModelKey::Stack, EnsembleMember::Stacked(stack));
        }
        Err(e) => warn!(error = %e, "Stacking model skipped"),
    }

    info!(
        features = feature_state.feature_count(),
        train_rows = split.train.len(),
        test_rows = split.test.len(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "Training complete"
    );

    Ok(TrainingOutcome {
        bundle: ArtifactBundle::new(models, feature_state),
        metrics,
        eda,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::fmt::Write;

    /// Synthetic transactions where large amounts late at night are fraud.
    fn synthetic_csv(n: usize) -> String {
        let mut csv = String::from(
            "TransactionID,TransactionDT,TransactionAmt,ProductCD,card1,card4,\
             DeviceInfo,id_01,isFraud\n",
        );
        for i in 0..n {
            let fraud = i % 4 == 0;
            let amount = if fraud { 900.0 + i as f64 } else { 20.0 + (i % 50) as f64 };
            let dt = if fraud { 3600 * 2 + i } else { 3600 * 14 + i };
            let card4 = if i % 3 == 0 { "visa" } else { "mastercard" };
            let id = if i % 5 == 0 { String::new() } else { format!("-{}", i % 7) };
            writeln!(
                csv,
                "{},{},{},W,{},{},Windows,{},{}",
                1000 + i,
                dt,
                amount,
                1000 + i % 6,
                card4,
                id,
                u8::from(fraud)
            )
            .unwrap();
        }
        csv
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            non_fraud_fraction: 1.0,
            n_estimators: 5,
            stack_folds: 2,
            ..AppConfig::default().training
        }
    }

    #[test]
    fn test_train_produces_all_outputs() {
        let raw = frame::read_csv(synthetic_csv(80).as_bytes()).unwrap();
        let outcome = train(&raw, &small_config()).unwrap();

        for key in ModelKey::ALL {
            assert!(outcome.bundle.models.contains(key), "{} missing", key);
            assert!(outcome.metrics.get(key).is_some());
        }
        assert!(outcome.metrics.get(ModelKey::Stack).unwrap().feature_importance.is_none());
        let xgb = outcome.metrics.get(ModelKey::Xgb).unwrap();
        let importance = xgb.feature_importance.as_ref().unwrap();
        assert!(importance.len() <= TOP_IMPORTANCES);

        let stats = &outcome.metrics.get(ModelKey::Xgb).unwrap().training_stats;
        assert_eq!(stats.dataset_sizes.total, 80);
        assert_eq!(stats.dataset_sizes.fraud, 20);
        assert!(!outcome.eda.fraud_by_hour.is_empty());
    }

    #[test]
    fn test_stacking_failure_is_not_fatal() {
        let raw = frame::read_csv(synthetic_csv(40).as_bytes()).unwrap();
        let config = TrainingConfig {
            stack_folds: 50,
            ..small_config()
        };
        let outcome = train(&raw, &config).unwrap();
        assert!(!outcome.bundle.models.contains(ModelKey::Stack));
        assert!(outcome.metrics.get(ModelKey::Stack).is_none());
        assert!(outcome.bundle.models.contains(ModelKey::Xgb));
    }

    #[test]
    fn test_missing_label_is_an_error() {
        let raw = frame::read_csv("TransactionDT,TransactionAmt\n1,2\n".as_bytes()).unwrap();
        assert!(train(&raw, &small_config()).is_err());
    }

    #[test]
    fn test_outcome_is_saved_to_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = AppConfig::default().artifacts;
        artifacts.results_dir = dir.path().to_string_lossy().into_owned();

        let raw = frame::read_csv(synthetic_csv(40).as_bytes()).unwrap();
        train(&raw, &small_config()).unwrap().save(&artifacts).unwrap();

        assert!(artifacts.bundle_path().exists());
        assert!(artifacts.metrics_path().exists());
        assert!(artifacts.training_eda_path().exists());
        let bundle = ArtifactBundle::load(artifacts.bundle_path()).unwrap();
        assert!(bundle.models.contains(ModelKey::Xgb));
    }
}
