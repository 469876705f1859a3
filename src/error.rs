//! Error types shared by the pipeline, the model layer and the API

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A trained artifact the service depends on is not on disk.
    #[error("Missing {}. Run the `train` binary to generate training artifacts.", path.display())]
    MissingArtifact { path: PathBuf },

    /// The upload carried no usable file or could not be parsed.
    #[error("{0}")]
    InvalidUpload(String),

    /// A column the pipeline cannot default is absent.
    #[error("Required column {0} is missing")]
    MissingColumn(String),

    /// A column that must be numeric holds text.
    #[error("Column {0} must be numeric")]
    NonNumericColumn(String),

    #[error("Model not available: {0}")]
    UnknownModelKey(String),

    #[error("No predictions available. Run /predict first.")]
    EmptyCache,

    /// An explanation asked for a batch that has since been replaced.
    #[error("Prediction batch {requested} is no longer cached (current batch is {current})")]
    StaleBatch { requested: String, current: String },

    /// Training could not proceed with the supplied data.
    #[error("Training failed: {0}")]
    Training(String),

    #[error("Data frame error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Internal error: {0}")]
    Internal(String),
}
