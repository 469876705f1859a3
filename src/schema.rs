//! Pre-flight comparison of an upload against the trained feature state.
//!
//! Reconciliation only looks at column names and categorical values of the
//! raw upload; it never runs the transform, so it can report on data that
//! would not score at all.

use crate::features::steps::UNKNOWN_CATEGORY;
use crate::features::FeatureState;
use crate::frame;
use crate::types::transaction::{is_known_column, DERIVED_COLUMNS, MISSING_SUFFIX};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// How an upload lines up with the columns the models expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAlignmentReport {
    /// Model features already present in the raw upload
    pub present_required: Vec<String>,
    /// Model features absent from the raw upload (derived or defaulted downstream)
    pub missing_required: Vec<String>,
    /// Columns the pipeline synthesizes for this upload
    pub created_columns: Vec<String>,
    /// Uploaded columns dropped by column selection
    pub ignored_columns: Vec<String>,
    pub final_feature_count: usize,
    /// Distinct values outside the training vocabulary, per column; `None` when there are
    /// none
    pub unseen_categories: Option<BTreeMap<String, usize>>,
}

impl SchemaAlignmentReport {
    pub fn has_drift(&self) -> bool {
        !self.missing_required.is_empty() || self.unseen_categories.is_some()
    }
}

/// Build the alignment report for a raw upload.
pub fn reconcile(raw: &DataFrame, state: &FeatureState) -> SchemaAlignmentReport {
    let present: BTreeSet<&str> = frame::column_names(raw).into_iter().collect();
    let required: BTreeSet<&str> = state.feature_columns.iter().map(String::as_str).collect();

    let present_required = required.intersection(&present).map(|c| c.to_string()).collect();
    let missing_required = required.difference(&present).map(|c| c.to_string()).collect();

    let created_columns: BTreeSet<String> = DERIVED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !present.contains(c))
        .chain(required.iter().copied().filter(|c| c.ends_with(MISSING_SUFFIX)))
        .map(str::to_string)
        .collect();

    let ignored_columns = present
        .iter()
        .copied()
        .filter(|c| !is_known_column(c))
        .map(str::to_string)
        .collect();

    let mut unseen_categories = BTreeMap::new();
    for (column, classes) in &state.categorical_vocabularies {
        let Ok(values) = raw.column(column) else { continue };
        let known: HashSet<&str> = classes.iter().map(String::as_str).collect();

        let distinct: HashSet<String> = frame::cell_strings(values)
            .into_iter()
            .map(|cell| cell.unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()))
            .collect();
        let unseen = distinct.iter().filter(|v| !known.contains(v.as_str())).count();
        if unseen > 0 {
            unseen_categories.insert(column.clone(), unseen);
        }
    }

    SchemaAlignmentReport {
        present_required,
        missing_required,
        created_columns: created_columns.into_iter().collect(),
        ignored_columns,
        final_feature_count: required.len(),
        unseen_categories: (!unseen_categories.is_empty()).then_some(unseen_categories),
    }
}
