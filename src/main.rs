//! Fraud Detection Service - Main Entry Point
//!
//! Serves predictions, explanations, metrics and EDA over HTTP from the
//! artifacts written by the `train` binary.

use anyhow::{Context, Result};
use fraud_detection_service::{api, config::AppConfig, logging};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!("Starting Fraud Detection Service");
    info!(
        "Prediction defaults: model={}, threshold={:.2}, top_k={}",
        config.prediction.default_model,
        config.prediction.default_threshold,
        config.prediction.default_top_k
    );

    let bundle_path = config.artifacts.bundle_path();
    if !bundle_path.exists() {
        warn!(
            path = %bundle_path.display(),
            "Model artifacts not found; prediction endpoints return 503 until `train` has run"
        );
    }

    let addr = config.server.socket_addr()?;
    let state = api::AppState::new(config);
    let app = api::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}/api/v1", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Service shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
