//! Single-slot cache of the most recent prediction batch.
//!
//! Explanations are computed against the exact rows and feature matrix the
//! last prediction produced. Every store replaces the slot wholesale and
//! mints a new batch id, so readers never observe a mix of two batches.

use crate::error::{Error, Result};
use crate::features::FeatureMatrix;
use crate::models::ModelKey;
use crate::types::PredictionRow;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CachedBatch {
    pub batch_id: Uuid,
    pub model_key: ModelKey,
    pub rows: Vec<PredictionRow>,
    pub features: FeatureMatrix,
    /// Upload as received, before column selection
    pub raw: DataFrame,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InferenceCache {
    slot: RwLock<Option<Arc<CachedBatch>>>,
}

impl InferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached batch and return its new id.
    pub async fn store(
        &self,
        rows: Vec<PredictionRow>,
        features: FeatureMatrix,
        raw: DataFrame,
        model_key: ModelKey,
    ) -> Uuid {
        let batch = CachedBatch {
            batch_id: Uuid::new_v4(),
            model_key,
            rows,
            features,
            raw,
            created_at: Utc::now(),
        };
        let batch_id = batch.batch_id;
        let mut slot = self.slot.write().await;
        *slot = Some(Arc::new(batch));
        debug!(%batch_id, model = %model_key, "Cached prediction batch");
        batch_id
    }

    /// Snapshot of the cached batch.
    pub async fn get(&self) -> Result<Arc<CachedBatch>> {
        self.slot.read().await.clone().ok_or(Error::EmptyCache)
    }

    /// Snapshot of the cached batch, checked against the id a caller holds.
    pub async fn get_batch(&self, batch_id: Option<&str>) -> Result<Arc<CachedBatch>> {
        let batch = self.get().await?;
        match batch_id {
            Some(requested) if requested != batch.batch_id.to_string() => Err(Error::StaleBatch {
                requested: requested.to_string(),
                current: batch.batch_id.to_string(),
            }),
            _ => Ok(batch),
        }
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}
