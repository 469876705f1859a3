//! HTTP API served under `/api/v1`.

pub mod error;
pub mod handlers;
pub mod upload;

pub use error::{ApiError, ApiResult};

use crate::cache::InferenceCache;
use crate::config::AppConfig;
use crate::eda::TrainingEda;
use crate::metrics::MetricsDocument;
use crate::models::{ArtifactBundle, LazyArtifact};
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub artifacts: Arc<LazyArtifact<ArtifactBundle>>,
    pub metrics: Arc<LazyArtifact<MetricsDocument>>,
    pub training_eda: Arc<LazyArtifact<TrainingEda>>,
    pub cache: Arc<InferenceCache>,
}

impl AppState {
    /// State whose artifacts are read from the configured results directory on first use.
    pub fn new(config: AppConfig) -> Self {
        let artifacts = LazyArtifact::new(config.artifacts.bundle_path());
        let metrics = LazyArtifact::new(config.artifacts.metrics_path());
        let training_eda = LazyArtifact::new(config.artifacts.training_eda_path());
        Self {
            config: Arc::new(config),
            artifacts: Arc::new(artifacts),
            metrics: Arc::new(metrics),
            training_eda: Arc::new(training_eda),
            cache: Arc::new(InferenceCache::new()),
        }
    }

    /// State with artifacts already in memory. Absent documents still load lazily.
    pub fn with_artifacts(
        config: AppConfig,
        bundle: ArtifactBundle,
        metrics: Option<MetricsDocument>,
        training_eda: Option<TrainingEda>,
    ) -> Self {
        let mut state = Self::new(config);
        let paths = &state.config.artifacts;
        state.artifacts = Arc::new(LazyArtifact::preloaded(paths.bundle_path(), bundle));
        if let Some(metrics) = metrics {
            state.metrics = Arc::new(LazyArtifact::preloaded(paths.metrics_path(), metrics));
        }
        if let Some(eda) = training_eda {
            state.training_eda = Arc::new(LazyArtifact::preloaded(paths.training_eda_path(), eda));
        }
        state
    }
}

/// Create the router with every route, CORS and request tracing
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes();

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .route("/metrics", get(handlers::metrics))
        .route("/eda/training", get(handlers::training_eda))
        .route("/eda/upload", post(handlers::upload_eda))
        .route("/predict", post(handlers::predict))
        .route("/explain", post(handlers::explain));

    Router::new()
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}
