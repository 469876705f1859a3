//! Per-row explanations for the cached prediction batch.
//!
//! A contribution is the standardized feature value times the model's
//! recorded importance for that feature. Contributions are grouped into
//! business categories so the UI can show where a score comes from.

use crate::cache::CachedBatch;
use crate::types::transaction::{
    TransactionRecord, ADDR1, CARD4, DEVICE_INFO, DEVICE_TYPE, P_EMAILDOMAIN, TRANSACTION_AMT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 8;
const MAX_CATEGORIES: usize = 5;

/// Row identifier as sent by clients: either `"3"` or `3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Index(i64),
    Text(String),
}

impl RowId {
    /// Row position, if the id is a non-negative integer.
    pub fn index(&self) -> Option<usize> {
        match self {
            RowId::Index(i) => usize::try_from(*i).ok(),
            RowId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Index(i) => write!(f, "{}", i),
            RowId::Text(s) => f.write_str(s),
        }
    }
}

/// What a feature's contribution is when the model recorded no weight for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportanceFallback {
    /// Use the feature value itself.
    #[default]
    RawValue,
}

impl ImportanceFallback {
    pub fn contribution(&self, value: f64, weight: Option<f64>) -> f64 {
        let value = if value.is_nan() { 0.0 } else { value };
        match (weight, self) {
            (Some(weight), _) => value * weight,
            (None, ImportanceFallback::RawValue) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Card profile")]
    CardProfile,
    #[serde(rename = "Address")]
    Address,
    #[serde(rename = "Email domain")]
    EmailDomain,
    #[serde(rename = "Device")]
    Device,
    #[serde(rename = "Amount")]
    Amount,
    #[serde(rename = "Time")]
    Time,
    #[serde(rename = "Identity")]
    Identity,
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::CardProfile => "Card profile",
            Category::Address => "Address",
            Category::EmailDomain => "Email domain",
            Category::Device => "Device",
            Category::Amount => "Amount",
            Category::Time => "Time",
            Category::Identity => "Identity",
            Category::Other => "Other",
        }
    }
}

/// Business category of a feature name.
pub fn categorize(feature: &str) -> Category {
    match feature {
        f if f.starts_with("card") => Category::CardProfile,
        f if f.starts_with("addr") => Category::Address,
        "P_emaildomain" | "R_emaildomain" => Category::EmailDomain,
        "DeviceType" | "DeviceInfo" => Category::Device,
        "TransactionAmt"
        | "TransactionAmt_log"
        | "TransactionAmt_by_card1"
        | "TransactionAmt_by_device" => Category::Amount,
        "TransactionDT" | "hour" => Category::Time,
        f if f.starts_with("id_") => Category::Identity,
        _ => Category::Other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: Category,
    pub percentage: f64,
}

/// Raw upload value shown next to the share of its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleField {
    pub label: String,
    pub value: serde_json::Value,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowExplanation {
    pub row_id: String,
    pub proba: f64,
    pub pred_label: u8,
    pub positives: Vec<Contribution>,
    pub negatives: Vec<Contribution>,
    pub category_breakdown: Vec<CategoryShare>,
    pub simple_fields: Vec<SimpleField>,
}

/// Explain the requested rows of `batch`. Ids that are unparsable or out of
/// range are skipped.
pub fn explain(
    batch: &CachedBatch,
    row_ids: &[RowId],
    importance: &HashMap<String, f64>,
    top_k: usize,
    fallback: ImportanceFallback,
) -> Vec<RowExplanation> {
    let mut explanations = Vec::with_capacity(row_ids.len());

    for row_id in row_ids {
        let Some(idx) = row_id.index() else {
            debug!(row_id = %row_id, "Skipping unparsable row id");
            continue;
        };
        let Some(values) = batch.features.row(idx) else {
            debug!(row_id = idx, "Skipping out-of-range row id");
            continue;
        };

        let contributions: Vec<Contribution> = batch
            .features
            .columns()
            .iter()
            .zip(values.iter())
            .map(|(feature, &value)| Contribution {
                feature: feature.clone(),
                value: fallback.contribution(value, importance.get(feature).copied()),
            })
            .collect();

        let category_breakdown = category_breakdown(&contributions);
        let simple_fields = TransactionRecord::new(&batch.raw, idx)
            .map(|record| simple_fields(&record, &category_breakdown))
            .unwrap_or_default();
        let prediction = batch.rows.get(idx);

        explanations.push(RowExplanation {
            row_id: row_id.to_string(),
            proba: prediction.map_or(0.0, |p| p.proba),
            pred_label: prediction.map_or(0, |p| p.pred_label),
            positives: top_contributions(&contributions, top_k, true),
            negatives: top_contributions(&contributions, top_k, false),
            category_breakdown,
            simple_fields,
        });
    }

    explanations
}

fn top_contributions(
    contributions: &[Contribution],
    top_k: usize,
    positive: bool,
) -> Vec<Contribution> {
    let mut selected: Vec<Contribution> = contributions
        .iter()
        .filter(|c| if positive { c.value > 0.0 } else { c.value < 0.0 })
        .cloned()
        .collect();
    if positive {
        selected.sort_by(|a, b| b.value.total_cmp(&a.value));
    } else {
        selected.sort_by(|a, b| a.value.total_cmp(&b.value));
    }
    selected.truncate(top_k);
    selected
}

/// Share of absolute contribution per category, largest first, top five.
pub fn category_breakdown(contributions: &[Contribution]) -> Vec<CategoryShare> {
    let mut totals: Vec<(Category, f64)> = Vec::new();
    let mut total_abs = 0.0;
    for contribution in contributions {
        let category = categorize(&contribution.feature);
        let magnitude = contribution.value.abs();
        total_abs += magnitude;
        match totals.iter_mut().find(|(c, _)| *c == category) {
            Some((_, sum)) => *sum += magnitude,
            None => totals.push((category, magnitude)),
        }
    }

    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals
        .into_iter()
        .take(MAX_CATEGORIES)
        .map(|(category, sum)| CategoryShare {
            category,
            percentage: if total_abs > 0.0 { sum / total_abs * 100.0 } else { 0.0 },
        })
        .collect()
}

fn simple_fields(record: &TransactionRecord, breakdown: &[CategoryShare]) -> Vec<SimpleField> {
    let share = |category: Category| {
        breakdown
            .iter()
            .find(|c| c.category == category)
            .map_or(0.0, |c| c.percentage)
    };
    let field = |label: &str, value: serde_json::Value, category: Category| SimpleField {
        label: label.to_string(),
        value,
        percentage: share(category),
    };

    vec![
        field("Transaction Amount", record.value(TRANSACTION_AMT), Category::Amount),
        field("Card Type", record.value(CARD4), Category::CardProfile),
        field("Device Type", record.value(DEVICE_TYPE), Category::Device),
        field("Device Info", record.value(DEVICE_INFO), Category::Device),
        field("Email Domain", record.value(P_EMAILDOMAIN), Category::EmailDomain),
        field("Address", record.value(ADDR1), Category::Address),
        field(
            "Hour",
            record.hour().map_or(serde_json::Value::Null, serde_json::Value::from),
            Category::Time,
        ),
    ]
}
