//! Fraud Detection Service Library
//!
//! Offline training of a boosted ensemble over merged transaction/identity
//! data, and an HTTP service that scores uploads, explains individual
//! predictions and reports exploratory summaries.

pub mod api;
pub mod cache;
pub mod config;
pub mod eda;
pub mod error;
pub mod explain;
pub mod features;
pub mod frame;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod sampling;
pub mod schema;
pub mod training;
pub mod types;
pub mod upload;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use models::{ArtifactBundle, ModelKey};
pub use training::{train, TrainingOutcome};
