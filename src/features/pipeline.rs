//! Fit and replay entry points of the feature pipeline

use crate::error::Result;
use crate::features::state::{FeatureState, MedianFallback, StandardScaler};
use crate::features::steps;
use crate::features::FeatureMatrix;
use crate::frame;
use crate::types::transaction::IS_FRAUD;
use polars::prelude::DataFrame;
use std::time::Instant;
use tracing::{debug, info};

/// Fit every stateful step on a labelled training frame.
///
/// Returns the standardized training matrix together with the state that
/// [`transform`] replays. The label and identifier columns never become features.
pub fn fit_transform(raw: &DataFrame) -> Result<(FeatureMatrix, FeatureState)> {
    let start = Instant::now();
    let mut df = steps::select_columns(raw, true)?;
    steps::validate_required(&df)?;
    frame::numeric(&df, IS_FRAUD)?;

    steps::add_hour(&mut df)?;
    let null_masks = steps::identity_null_masks(&df);

    let medians = steps::fit_medians(&df);
    steps::impute_numeric(&mut df, &medians, MedianFallback::default())?;

    let categorical_columns = steps::fill_categorical(&mut df)?;
    steps::add_missing_indicators(&mut df, &null_masks)?;

    let categorical_vocabularies = steps::fit_vocabularies(&df, &categorical_columns)?;
    steps::encode_categoricals(&mut df, &categorical_columns, &categorical_vocabularies)?;

    steps::add_amount_features(&mut df)?;

    let feature_columns = steps::fit_feature_columns(&df);
    let mut matrix = steps::align_columns(&df, &feature_columns)?;
    let scaler = StandardScaler::fit(matrix.values().view());
    let mut values = matrix.values().clone();
    scaler.transform(&mut values)?;
    matrix = FeatureMatrix::new(feature_columns.clone(), values)?;

    info!(
        rows = matrix.n_rows(),
        features = matrix.n_features(),
        categorical = categorical_columns.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Feature state fitted"
    );

    let state = FeatureState {
        medians,
        categorical_vocabularies,
        categorical_columns,
        scaler,
        feature_columns,
    };
    Ok((matrix, state))
}

/// Replay a fitted state on arbitrary uploaded data.
pub fn transform(raw: &DataFrame, state: &FeatureState) -> Result<FeatureMatrix> {
    transform_with(raw, state, MedianFallback::default())
}

/// [`transform`] with an explicit policy for columns lacking a recorded median.
pub fn transform_with(
    raw: &DataFrame,
    state: &FeatureState,
    fallback: MedianFallback,
) -> Result<FeatureMatrix> {
    let mut df = steps::select_columns(raw, false)?;
    steps::validate_required(&df)?;

    steps::add_hour(&mut df)?;
    let null_masks = steps::identity_null_masks(&df);
    steps::reconcile_dtypes(&mut df, state)?;

    steps::impute_numeric(&mut df, &state.medians, fallback)?;
    let categorical_columns = steps::fill_categorical(&mut df)?;
    steps::add_missing_indicators(&mut df, &null_masks)?;
    steps::encode_categoricals(&mut df, &categorical_columns, &state.categorical_vocabularies)?;

    steps::add_amount_features(&mut df)?;

    let matrix = steps::align_columns(&df, &state.feature_columns)?;
    let mut values = matrix.values().clone();
    state.scaler.transform(&mut values)?;

    debug!(
        rows = values.nrows(),
        features = values.ncols(),
        "Replayed feature state"
    );
    FeatureMatrix::new(state.feature_columns.clone(), values)
}
