//! Route handlers

use crate::api::error::{ApiError, ApiResult};
use crate::api::upload::read_multipart;
use crate::api::AppState;
use crate::eda::{self, TrainingEda, UploadEda};
use crate::error::Error;
use crate::explain::{explain as explain_rows, ImportanceFallback, RowExplanation, RowId};
use crate::metrics::ModelReport;
use crate::models::{score_upload, ModelKey};
use crate::types::PredictionResponse;
use axum::{
    extract::{rejection::JsonRejection, Multipart, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub key: ModelKey,
    pub name: String,
    pub trained_at: DateTime<Utc>,
    pub supports_threshold: bool,
    pub supports_explain: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

pub async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let trained_at = match state.metrics.get().await {
        Ok(doc) => doc.trained_at(),
        Err(e) => {
            warn!(error = %e, "Metrics unavailable, reporting current time as training time");
            None
        }
    }
    .unwrap_or_else(Utc::now);

    let models = ModelKey::ALL
        .into_iter()
        .map(|key| ModelInfo {
            key,
            name: key.display_name().to_string(),
            trained_at,
            supports_threshold: key.supports_threshold(),
            supports_explain: true,
        })
        .collect();
    Json(ModelsResponse { models })
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub model: Option<String>,
}

fn model_key(requested: Option<&str>, state: &AppState) -> ApiResult<ModelKey> {
    let key = requested.unwrap_or(state.config.prediction.default_model.as_str());
    Ok(key.parse::<ModelKey>()?)
}

pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<Json<ModelReport>> {
    let key = model_key(query.model.as_deref(), &state)?;
    let doc = state.metrics.get().await?;
    let report = doc
        .get(key)
        .cloned()
        .ok_or_else(|| Error::UnknownModelKey(key.to_string()))?;
    Ok(Json(report))
}

pub async fn training_eda(State(state): State<AppState>) -> ApiResult<Json<TrainingEda>> {
    let eda = state.training_eda.get().await?;
    Ok(Json(TrainingEda::clone(&eda)))
}

pub async fn predict(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<PredictionResponse>> {
    let form = read_multipart(multipart).await?;
    let key = model_key(form.field("model"), &state)?;
    let threshold = match form.field("threshold") {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid threshold: {}", raw)))?,
        None => state.config.prediction.default_threshold,
    };

    let bundle = state.artifacts.get().await?;
    bundle.models.member(key)?;
    let dataset = form.files.into_dataset(true)?;
    let raw = dataset.frame;

    let (scored, raw) = tokio::task::spawn_blocking(move || {
        score_upload(&bundle, key, &raw, threshold).map(|scored| (scored, raw))
    })
    .await??;

    let summary = scored.summary(key);
    let rows = scored.rows.clone();
    let batch_id = state.cache.store(scored.rows, scored.features, raw, key).await;
    info!(
        %batch_id,
        model = %key,
        rows = summary.total,
        fraud = summary.fraud_count,
        "Prediction served"
    );

    Ok(Json(PredictionResponse {
        batch_id: batch_id.to_string(),
        summary,
        rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub row_ids: Vec<RowId>,
    pub top_k: Option<usize>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub explanations: Vec<RowExplanation>,
}

pub async fn explain(
    State(state): State<AppState>,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> ApiResult<Json<ExplainResponse>> {
    let Json(request) = payload?;
    let batch = state.cache.get_batch(request.batch_id.as_deref()).await?;
    let key = match request.model.as_deref() {
        Some(model) => model.parse::<ModelKey>()?,
        None => batch.model_key,
    };
    let top_k = request.top_k.unwrap_or(state.config.prediction.default_top_k);

    let importance = match state.metrics.get().await {
        Ok(doc) => doc.importance_map(key),
        Err(e) => {
            warn!(error = %e, "No recorded importances; explaining with raw feature values");
            HashMap::new()
        }
    };

    let explanations = explain_rows(
        &batch,
        &request.row_ids,
        &importance,
        top_k,
        ImportanceFallback::RawValue,
    );
    Ok(Json(ExplainResponse { explanations }))
}

pub async fn upload_eda(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadEda>> {
    let form = read_multipart(multipart).await?;
    let dataset = form.files.into_dataset(false)?;
    let bundle = state.artifacts.get().await?;

    let report = tokio::task::spawn_blocking(move || {
        eda::upload_eda(&dataset.frame, &dataset.meta, &bundle.feature_state)
    })
    .await?;
    Ok(Json(report))
}
