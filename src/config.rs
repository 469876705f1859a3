//! Configuration management for the fraud detection service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable that points at an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "FRAUD_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
    pub prediction: PredictionConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    200
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    /// Socket address the API binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Locations of the artifacts produced by the offline training run
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory containing every training output
    pub results_dir: String,
    /// Serialized models + feature state
    pub bundle_file: String,
    /// Evaluation metrics keyed by model
    pub metrics_file: String,
    /// Precomputed training-set exploratory summary
    pub training_eda_file: String,
}

impl ArtifactsConfig {
    pub fn bundle_path(&self) -> PathBuf {
        Path::new(&self.results_dir).join(&self.bundle_file)
    }

    pub fn metrics_path(&self) -> PathBuf {
        Path::new(&self.results_dir).join(&self.metrics_file)
    }

    pub fn training_eda_path(&self) -> PathBuf {
        Path::new(&self.results_dir).join(&self.training_eda_file)
    }
}

/// Request defaults for the prediction and explanation endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Model used when a request does not name one
    pub default_model: String,
    /// Decision threshold used when a request does not supply one
    pub default_threshold: f64,
    /// Number of positive/negative contributions reported per row
    pub default_top_k: usize,
}

/// Offline training run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Directory containing the raw training CSV files
    pub data_dir: String,
    pub transaction_file: String,
    pub identity_file: String,
    /// Fraction of non-fraud rows kept by downsampling
    pub non_fraud_fraction: f64,
    /// Held-out share of the stratified split
    pub test_size: f64,
    /// Seed for sampling, splitting and tree subsampling
    pub seed: u64,
    /// Decision threshold used when evaluating the stacked model
    pub stack_threshold: f64,
    /// Out-of-fold splits used to build the meta-learner's inputs
    pub stack_folds: usize,
    /// Boosting rounds for both base models
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
}

fn default_n_estimators() -> usize {
    500
}

impl TrainingConfig {
    pub fn transaction_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.transaction_file)
    }

    pub fn identity_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.identity_file)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `FRAUD_CONFIG` or the default file
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// Values can be overridden with `FRAUD__<SECTION>__<KEY>` environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                max_upload_mb: default_max_upload_mb(),
            },
            artifacts: ArtifactsConfig {
                results_dir: "results".to_string(),
                bundle_file: "artifacts.json".to_string(),
                metrics_file: "metrics.json".to_string(),
                training_eda_file: "eda_training.json".to_string(),
            },
            prediction: PredictionConfig {
                default_model: "xgb".to_string(),
                default_threshold: 0.5,
                default_top_k: 8,
            },
            training: TrainingConfig {
                data_dir: "datasets".to_string(),
                transaction_file: "train_transaction.csv".to_string(),
                identity_file: "train_identity.csv".to_string(),
                non_fraud_fraction: 0.3,
                test_size: 0.2,
                seed: 42,
                stack_threshold: 0.3,
                stack_folds: 5,
                n_estimators: default_n_estimators(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
