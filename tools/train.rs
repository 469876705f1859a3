//! Offline Training Run
//!
//! Reads the raw transaction and identity CSVs, fits the feature pipeline and
//! the model ensemble, and writes artifacts, metrics and training EDA into the
//! results directory the service reads from.

use anyhow::{Context, Result};
use fraud_detection_service::{config::AppConfig, logging, training};
use tracing::info;

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!(
        transactions = %config.training.transaction_path().display(),
        identity = %config.training.identity_path().display(),
        "Loading training data"
    );
    let raw = training::load_training_frame(&config.training)
        .context("Failed to load training data")?;

    let outcome = training::train(&raw, &config.training).context("Training failed")?;
    outcome
        .save(&config.artifacts)
        .context("Failed to write training artifacts")?;

    for key in outcome.metrics.keys() {
        if let Some(report) = outcome.metrics.get(key) {
            info!(
                model = %key,
                roc_auc = format!("{:.4}", report.metrics.roc_auc),
                pr_auc = format!("{:.4}", report.metrics.pr_auc),
                precision = format!("{:.4}", report.metrics.precision),
                recall = format!("{:.4}", report.metrics.recall),
                "Held-out metrics"
            );
        }
    }
    info!(
        results_dir = %config.artifacts.results_dir,
        "Artifacts written"
    );
    Ok(())
}
