//! Exploratory data reports for training data and uploads

use crate::features::FeatureState;
use crate::frame;
use crate::schema::{self, SchemaAlignmentReport};
use crate::types::transaction::{
    hour_of_day, ADDR1, CARD1, CARD4, DEVICE_TYPE, HOUR, IS_FRAUD, PRODUCT_CD, P_EMAILDOMAIN,
    TRANSACTION_AMT, TRANSACTION_DT, TRANSACTION_ID,
};
use crate::upload::{DatasetType, UploadMeta, UploadedFile};
use chrono::{DateTime, Utc};
use polars::prelude::{Column, DataFrame};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

const TOP_MISSING: usize = 20;
const HISTOGRAM_BINS: usize = 20;
const TOP_CATEGORIES: usize = 10;
const MANY_MISSING_IDS: usize = 5;

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Equal-width bins over `[min, max]`, right-closed, first edge nudged down
/// so the minimum is counted.
fn histogram(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let Some(min) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = values.iter().copied().fold(min, f64::max);

    let mut edges: Vec<f64> = if max > min {
        let width = (max - min) / bins as f64;
        let mut edges: Vec<f64> = (0..=bins).map(|i| min + width * i as f64).collect();
        edges[0] -= (max - min) * 0.001;
        edges
    } else {
        let pad = if min == 0.0 { 0.001 } else { min.abs() * 0.001 };
        let (lo, hi) = (min - pad, max + pad);
        let width = (hi - lo) / bins as f64;
        (0..=bins).map(|i| lo + width * i as f64).collect()
    };
    if let Some(last) = edges.last_mut() {
        *last = last.max(max);
    }

    let mut counts = vec![0usize; bins];
    for &v in values {
        let idx = edges[1..].partition_point(|&edge| edge < v).min(bins - 1);
        counts[idx] += 1;
    }
    edges
        .windows(2)
        .zip(counts)
        .map(|(edge, count)| (edge[0], edge[1], count))
        .collect()
}

fn bin_label(left: f64, right: f64) -> String {
    format!("{:.2}-{:.2}", left, right)
}

/// Null counts per column, largest first.
fn missing_counts(df: &DataFrame) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = df
        .get_columns()
        .iter()
        .map(|column| (column.name().to_string(), column.null_count()))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingCount {
    pub feature: String,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub bin: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingDistributions {
    pub transaction_amount: Vec<HistogramBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyFraudRate {
    pub hour: i64,
    pub fraud_rate: f64,
}

/// Contents of `eda_training.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEda {
    pub missingness: Vec<MissingCount>,
    pub distributions: TrainingDistributions,
    pub fraud_by_hour: Vec<HourlyFraudRate>,
}

/// Training report over the sampled raw data, after the hour feature is
/// added and before imputation.
pub fn training_eda(df: &DataFrame) -> TrainingEda {
    let missingness = missing_counts(df)
        .into_iter()
        .take(TOP_MISSING)
        .map(|(feature, missing)| MissingCount { feature, missing })
        .collect();

    let mut amounts = df
        .column(TRANSACTION_AMT)
        .map(frame::observed_numbers)
        .unwrap_or_default();
    amounts.sort_by(|a, b| a.total_cmp(b));
    let cap = quantile(&amounts, 0.99);
    let below_cap: Vec<f64> = amounts.into_iter().filter(|&v| v <= cap).collect();
    let transaction_amount = histogram(&below_cap, HISTOGRAM_BINS)
        .into_iter()
        .map(|(left, right, count)| HistogramBin {
            bin: bin_label(left, right),
            count,
        })
        .collect();

    let mut by_hour: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    if let (Ok(hours), Ok(labels)) = (frame::numeric(df, HOUR), frame::numeric(df, IS_FRAUD)) {
        for (hour, label) in hours.into_iter().zip(labels) {
            if let (Some(hour), Some(label)) = (hour, label) {
                let entry = by_hour.entry(hour as i64).or_default();
                entry.0 += usize::from(label == 1.0);
                entry.1 += 1;
            }
        }
    }
    let fraud_by_hour = by_hour
        .into_iter()
        .map(|(hour, (fraud, total))| HourlyFraudRate {
            hour,
            fraud_rate: fraud as f64 / total as f64,
        })
        .collect();

    TrainingEda {
        missingness,
        distributions: TrainingDistributions { transaction_amount },
        fraud_by_hour,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub rows: usize,
    pub columns: usize,
    pub numeric_columns: usize,
    pub categorical_columns: usize,
    pub binary_columns: usize,
    pub transaction_id_present: bool,
    pub dataset_type: DatasetType,
    pub upload_timestamp: DateTime<Utc>,
    pub file_size_bytes: usize,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingShare {
    pub feature: String,
    pub missing: usize,
    pub missing_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMissingness {
    pub overall_missing_pct: f64,
    pub rows_with_missing_pct: f64,
    pub top: Vec<MissingShare>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    pub numeric: usize,
    pub categorical: usize,
    pub binary: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; `None` below two values
    pub std: Option<f64>,
    /// Values outside 1.5 IQR of the quartiles
    pub outliers: usize,
}

impl NumericStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let std = (sorted.len() > 1)
            .then(|| (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt());

        let (q1, q3) = (quantile(&sorted, 0.25), quantile(&sorted, 0.75));
        let iqr = q3 - q1;
        let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            median: quantile(&sorted, 0.5),
            std,
            outliers: sorted.iter().filter(|&&v| v < lower || v > upper).count(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelValue {
    pub label: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAnalysis {
    pub id_columns_present: usize,
    pub id_missing_percent: f64,
    pub rows_with_many_missing_ids: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duplicates {
    pub transaction_id_duplicates: usize,
}

/// Response of the upload EDA endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEda {
    pub summary: UploadSummary,
    pub missingness: UploadMissingness,
    pub type_breakdown: TypeBreakdown,
    pub stats: BTreeMap<String, Option<NumericStats>>,
    pub distributions: BTreeMap<String, Vec<LabelValue>>,
    pub identity_analysis: Option<IdentityAnalysis>,
    pub schema_alignment: SchemaAlignmentReport,
    pub duplicates: Option<Duplicates>,
    pub warnings: Vec<String>,
}

fn labelled_histogram(values: &[f64]) -> Vec<LabelValue> {
    histogram(values, HISTOGRAM_BINS)
        .into_iter()
        .map(|(left, right, count)| LabelValue {
            label: bin_label(left, right),
            value: count,
        })
        .collect()
}

/// Most frequent values, ties in order of first appearance.
fn value_counts<I: IntoIterator<Item = String>>(values: I, top: usize) -> Vec<LabelValue> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        let count = counts.entry(value.clone()).or_insert(0);
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }
    let mut ranked: Vec<LabelValue> = order
        .into_iter()
        .map(|label| {
            let value = counts[&label];
            LabelValue { label, value }
        })
        .collect();
    ranked.sort_by(|a, b| b.value.cmp(&a.value));
    ranked.truncate(top);
    ranked
}

fn column_values(column: &Column) -> impl Iterator<Item = String> {
    frame::cell_strings(column).into_iter().flatten()
}

fn distributions(df: &DataFrame) -> BTreeMap<String, Vec<LabelValue>> {
    let mut distributions = BTreeMap::new();

    if let Ok(amount) = df.column(TRANSACTION_AMT) {
        let amounts = frame::observed_numbers(amount);
        let logs: Vec<f64> = amounts
            .iter()
            .map(|&v| if v > 0.0 { v.ln_1p() } else { 0.0 })
            .collect();
        distributions.insert("transaction_amount".to_string(), labelled_histogram(&amounts));
        distributions.insert("transaction_amount_log".to_string(), labelled_histogram(&logs));
    }

    if let Ok(timestamp) = df.column(TRANSACTION_DT) {
        let seconds = frame::to_numeric_lossy(timestamp)
            .map(|column| frame::observed_numbers(&column))
            .unwrap_or_default();
        let hours = seconds.into_iter().map(|s| hour_of_day(s).to_string());
        distributions.insert("hour".to_string(), value_counts(hours, 24));
    } else if let Ok(hour) = df.column(HOUR) {
        distributions.insert("hour".to_string(), value_counts(column_values(hour), 24));
    }

    for (column, key) in [
        (PRODUCT_CD, "product_cd"),
        (DEVICE_TYPE, "device_type"),
        (CARD4, "card4"),
        (P_EMAILDOMAIN, "email_domain"),
    ] {
        if let Ok(values) = df.column(column) {
            let counts = value_counts(column_values(values), TOP_CATEGORIES);
            distributions.insert(key.to_string(), counts);
        }
    }
    distributions
}

fn identity_analysis(df: &DataFrame) -> Option<IdentityAnalysis> {
    let id_columns: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|column| column.name().starts_with("id_"))
        .collect();
    if id_columns.is_empty() {
        return None;
    }

    let rows = df.height();
    let missing: usize = id_columns.iter().map(|c| c.null_count()).sum();
    let cells = id_columns.len() * rows;

    let mut missing_per_row = vec![0usize; rows];
    for column in &id_columns {
        for (row, null) in frame::null_mask(column).into_iter().enumerate() {
            missing_per_row[row] += usize::from(null);
        }
    }
    let rows_with_many_missing = missing_per_row
        .iter()
        .filter(|&&count| count >= MANY_MISSING_IDS)
        .count();

    Some(IdentityAnalysis {
        id_columns_present: id_columns.len(),
        id_missing_percent: if cells > 0 {
            missing as f64 / cells as f64 * 100.0
        } else {
            0.0
        },
        rows_with_many_missing_ids: rows_with_many_missing,
    })
}

fn duplicate_ids(df: &DataFrame) -> Option<Duplicates> {
    let ids = df.column(TRANSACTION_ID).ok()?;
    let mut seen = HashSet::new();
    let duplicates = frame::cell_strings(ids)
        .into_iter()
        .filter(|id| !seen.insert(id.clone()))
        .count();
    Some(Duplicates {
        transaction_id_duplicates: duplicates,
    })
}

/// Full report for an upload, compared against the trained feature state.
pub fn upload_eda(df: &DataFrame, meta: &UploadMeta, state: &FeatureState) -> UploadEda {
    let rows = df.height();
    let columns = df.width();
    let numeric = df.get_columns().iter().filter(|c| frame::is_numeric(c)).count();
    let binary = df
        .get_columns()
        .iter()
        .filter(|c| frame::distinct_count(c) <= 2)
        .count();
    let type_breakdown = TypeBreakdown {
        numeric,
        categorical: columns - numeric,
        binary,
    };

    let counts = missing_counts(df);
    let total_missing: usize = counts.iter().map(|(_, n)| n).sum();
    let total_cells = rows * columns;
    let overall_missing_pct = if total_cells > 0 {
        total_missing as f64 / total_cells as f64 * 100.0
    } else {
        0.0
    };
    let mut row_has_missing = vec![false; rows];
    for column in df.get_columns().iter().filter(|c| c.null_count() > 0) {
        for (row, null) in frame::null_mask(column).into_iter().enumerate() {
            row_has_missing[row] |= null;
        }
    }
    let rows_with_missing = row_has_missing.iter().filter(|&&missing| missing).count();
    let rows_with_missing_pct = if rows > 0 {
        rows_with_missing as f64 / rows as f64 * 100.0
    } else {
        0.0
    };
    let top = counts
        .into_iter()
        .take(TOP_MISSING)
        .map(|(feature, missing)| MissingShare {
            feature,
            missing,
            missing_pct: if rows > 0 {
                missing as f64 / rows as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect();

    let stats = [TRANSACTION_AMT, HOUR, CARD1, ADDR1]
        .into_iter()
        .filter_map(|name| {
            let column = df.column(name).ok()?;
            let stats = NumericStats::from_values(&frame::observed_numbers(column));
            Some((name.to_string(), stats))
        })
        .collect();

    let identity_analysis = identity_analysis(df);

    let mut warnings = Vec::new();
    if identity_analysis.as_ref().is_some_and(|a| a.id_missing_percent > 30.0) {
        warnings.push(
            "Identity features are heavily missing; risk signals may be weaker.".to_string(),
        );
    }
    if overall_missing_pct > 20.0 {
        warnings.push(
            "High overall missingness detected; results may be less reliable.".to_string(),
        );
    }
    if !frame::contains(df, TRANSACTION_DT) {
        warnings.push(
            "TransactionDT missing; hour feature may be imputed or unavailable.".to_string(),
        );
    }

    UploadEda {
        summary: UploadSummary {
            rows,
            columns,
            numeric_columns: type_breakdown.numeric,
            categorical_columns: type_breakdown.categorical,
            binary_columns: type_breakdown.binary,
            transaction_id_present: frame::contains(df, TRANSACTION_ID),
            dataset_type: meta.dataset_type,
            upload_timestamp: Utc::now(),
            file_size_bytes: meta.total_bytes(),
            files: meta.files.clone(),
        },
        missingness: UploadMissingness {
            overall_missing_pct,
            rows_with_missing_pct,
            top,
        },
        type_breakdown,
        stats,
        distributions: distributions(df),
        identity_analysis,
        schema_alignment: schema::reconcile(df, state),
        duplicates: duplicate_ids(df),
        warnings,
    }
}
