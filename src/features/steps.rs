//! Individual feature transforms.
//!
//! Each step is a pure function of the frame and, in replay mode, the
//! recorded [`FeatureState`]. The pipeline applies them in a fixed order.

use crate::error::Result;
use crate::features::state::{FeatureState, MedianFallback, UNSEEN_CATEGORY_CODE};
use crate::features::FeatureMatrix;
use crate::frame;
use crate::types::transaction::{
    hour_of_day, is_identity_column, AMOUNT_BY_CARD, AMOUNT_BY_DEVICE, AMOUNT_LOG, BASE_COLUMNS,
    CARD1, DEVICE_INFO, HOUR, IS_FRAUD, MISSING_SUFFIX, TRANSACTION_AMT, TRANSACTION_DT,
    TRANSACTION_ID,
};
use ndarray::Array2;
use polars::prelude::{col, lit, Column, DataFrame, Expr, IntoLazy, NamedFrom, Series};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const GROUP_MEAN: &str = "group_mean";

/// Columns that are never imputed, scaled or fed to a model.
pub fn is_excluded_column(name: &str) -> bool {
    name == TRANSACTION_ID || name == IS_FRAUD
}

/// Keep the whitelisted raw columns (and the label when requested) plus every identity column.
pub fn select_columns(raw: &DataFrame, keep_label: bool) -> Result<DataFrame> {
    let mut ordered: Vec<&str> = BASE_COLUMNS
        .iter()
        .copied()
        .filter(|c| frame::contains(raw, c))
        .collect();
    if keep_label && frame::contains(raw, IS_FRAUD) {
        ordered.push(IS_FRAUD);
    }
    ordered.extend(
        frame::column_names(raw)
            .into_iter()
            .filter(|name| is_identity_column(name)),
    );
    Ok(raw.select(ordered)?)
}

/// Fail on absent or non-numeric timestamp/amount columns.
pub fn validate_required(df: &DataFrame) -> Result<()> {
    frame::numeric(df, TRANSACTION_DT)?;
    frame::numeric(df, TRANSACTION_AMT)?;
    Ok(())
}

/// `hour = floor((TransactionDT / 3600) mod 24)`; null timestamps give null hours.
pub fn add_hour(df: &mut DataFrame) -> Result<()> {
    let hours: Vec<Option<f64>> = frame::numeric(df, TRANSACTION_DT)?
        .into_iter()
        .map(|dt| dt.filter(|v| v.is_finite()).map(|v| hour_of_day(v) as f64))
        .collect();
    df.with_column(frame::float_column(HOUR, hours))?;
    Ok(())
}

/// Original nullness of every identity column, captured before imputation.
pub fn identity_null_masks(df: &DataFrame) -> Vec<(String, Vec<bool>)> {
    df.get_columns()
        .iter()
        .filter(|column| is_identity_column(column.name().as_str()))
        .map(|column| (column.name().to_string(), frame::null_mask(column)))
        .collect()
}

/// Bring uploaded column types in line with what training saw.
///
/// Categorical training columns that arrive numeric become text; numeric
/// training columns that arrive as text are parsed, unparsable cells become null.
pub fn reconcile_dtypes(df: &mut DataFrame, state: &FeatureState) -> Result<()> {
    let mut converted = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        let numeric = frame::is_numeric(column);
        if numeric && state.is_categorical(name) {
            converted.push(frame::to_text(column));
        } else if !numeric && state.median(name).is_some() {
            converted.push(frame::to_numeric_lossy(column)?);
        }
    }
    for column in converted {
        debug!(
            column = %column.name(),
            numeric = frame::is_numeric(&column),
            "Reconciled column type with training schema"
        );
        df.with_column(column)?;
    }
    Ok(())
}

/// Numeric columns eligible for imputation and scaling.
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|column| frame::is_numeric(column) && !is_excluded_column(column.name()))
        .map(|column| column.name().to_string())
        .collect()
}

/// Median of every numeric input column (fit mode).
pub fn fit_medians(df: &DataFrame) -> BTreeMap<String, f64> {
    numeric_columns(df)
        .into_iter()
        .filter_map(|name| {
            let column = df.column(&name).ok()?;
            Some((name, frame::median(column)))
        })
        .collect()
}

/// Replace nulls with recorded medians, falling back per `fallback` for unrecorded columns.
pub fn impute_numeric(
    df: &mut DataFrame,
    medians: &BTreeMap<String, f64>,
    fallback: MedianFallback,
) -> Result<()> {
    let mut fills: Vec<Expr> = Vec::new();
    for name in numeric_columns(df) {
        let Ok(column) = df.column(&name) else { continue };
        if column.null_count() == 0 {
            continue;
        }

        let fill = match medians.get(&name) {
            Some(value) => *value,
            None => {
                let value = fallback.resolve(column);
                debug!(column = %name, fill = value, "No recorded median, using fallback");
                value
            }
        };
        fills.push(col(name.as_str()).fill_null(lit(fill)));
    }

    if !fills.is_empty() {
        *df = df.clone().lazy().with_columns(fills).collect()?;
    }
    Ok(())
}

/// Sentinel for missing categorical values.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Fill text nulls with [`UNKNOWN_CATEGORY`]; returns the text column names.
pub fn fill_categorical(df: &mut DataFrame) -> Result<Vec<String>> {
    let text_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|column| !frame::is_numeric(column))
        .map(|column| column.name().to_string())
        .collect();

    if !text_columns.is_empty() {
        let fills: Vec<Expr> = text_columns
            .iter()
            .map(|name| col(name.as_str()).fill_null(lit(UNKNOWN_CATEGORY)))
            .collect();
        *df = df.clone().lazy().with_columns(fills).collect()?;
    }
    Ok(text_columns)
}

/// Append `<column>_missing` indicators from previously captured null masks.
pub fn add_missing_indicators(df: &mut DataFrame, masks: &[(String, Vec<bool>)]) -> Result<()> {
    for (name, mask) in masks {
        let indicator: Vec<f64> = mask.iter().map(|&m| f64::from(u8::from(m))).collect();
        df.with_column(Series::new(format!("{}{}", name, MISSING_SUFFIX).into(), indicator))?;
    }
    Ok(())
}

/// Distinct values per categorical column, in first-seen order (fit mode).
pub fn fit_vocabularies(
    df: &DataFrame,
    categorical: &[String],
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut vocabularies = BTreeMap::new();
    for name in categorical {
        let Ok(column) = df.column(name) else { continue };
        let unique: Column = column.as_materialized_series().unique_stable()?.into();
        let classes: Vec<String> = frame::texts(&unique)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        vocabularies.insert(name.clone(), classes);
    }
    Ok(vocabularies)
}

/// Replace categorical text with vocabulary codes; unseen values get [`UNSEEN_CATEGORY_CODE`].
pub fn encode_categoricals(
    df: &mut DataFrame,
    categorical: &[String],
    vocabularies: &BTreeMap<String, Vec<String>>,
) -> Result<()> {
    for name in categorical {
        let Some(values) = df.column(name).ok().and_then(frame::texts) else { continue };
        let codes: HashMap<&str, i64> = vocabularies
            .get(name)
            .map(|classes| {
                classes
                    .iter()
                    .enumerate()
                    .map(|(code, class)| (class.as_str(), code as i64))
                    .collect()
            })
            .unwrap_or_default();

        let encoded: Vec<Option<f64>> = values
            .iter()
            .map(|cell| {
                let code = cell
                    .as_deref()
                    .and_then(|value| codes.get(value).copied())
                    .unwrap_or(UNSEEN_CATEGORY_CODE);
                Some(code as f64)
            })
            .collect();

        let unseen = encoded
            .iter()
            .filter(|code| **code == Some(UNSEEN_CATEGORY_CODE as f64))
            .count();
        if unseen > 0 {
            debug!(column = %name, unseen, "Unseen categorical values encoded as unknown");
        }
        df.with_column(frame::float_column(name, encoded))?;
    }
    Ok(())
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// `amount / mean(amount)` within each group of `key`, computed over this batch only.
fn ratio_to_group_mean(df: &DataFrame, amounts: &[f64], key: &str) -> Result<Vec<Option<f64>>> {
    let means = df
        .clone()
        .lazy()
        .select([col(TRANSACTION_AMT)
            .fill_null(lit(0.0))
            .mean()
            .over([col(key)])
            .alias(GROUP_MEAN)])
        .collect()?;

    Ok(amounts
        .iter()
        .zip(frame::numeric(&means, GROUP_MEAN)?)
        .map(|(amount, mean)| {
            let mean = mean.unwrap_or(0.0);
            Some(if mean == 0.0 { 0.0 } else { finite_or_zero(amount / mean) })
        })
        .collect())
}

/// Log amount and the two batch-relative amount ratios.
///
/// A ratio whose grouping column is absent is skipped; alignment fills it with 0.
pub fn add_amount_features(df: &mut DataFrame) -> Result<()> {
    let amounts: Vec<f64> = frame::numeric(df, TRANSACTION_AMT)?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();

    let log_amount = amounts.iter().map(|a| Some(finite_or_zero(a.ln_1p()))).collect();
    df.with_column(frame::float_column(AMOUNT_LOG, log_amount))?;

    for (group_column, feature) in [(CARD1, AMOUNT_BY_CARD), (DEVICE_INFO, AMOUNT_BY_DEVICE)] {
        if !frame::contains(df, group_column) {
            debug!(
                column = group_column,
                feature,
                "Grouping column absent, skipping ratio feature"
            );
            continue;
        }
        let ratios = ratio_to_group_mean(df, &amounts, group_column)?;
        df.with_column(frame::float_column(feature, ratios))?;
    }
    Ok(())
}

/// Every input column in frame order (fit mode).
pub fn fit_feature_columns(df: &DataFrame) -> Vec<String> {
    frame::column_names(df)
        .into_iter()
        .filter(|name| !is_excluded_column(name))
        .map(str::to_string)
        .collect()
}

/// Build the model matrix in `feature_columns` order; absent columns become 0.
pub fn align_columns(df: &DataFrame, feature_columns: &[String]) -> Result<FeatureMatrix> {
    let mut values = Array2::<f64>::zeros((df.height(), feature_columns.len()));
    let mut injected = 0usize;

    for (j, name) in feature_columns.iter().enumerate() {
        match df.column(name).ok().and_then(frame::numbers) {
            Some(cells) => {
                for (i, cell) in cells.into_iter().enumerate() {
                    values[[i, j]] = cell.map_or(0.0, finite_or_zero);
                }
            }
            None => injected += 1,
        }
    }

    if injected > 0 {
        debug!(injected, total = feature_columns.len(), "Injected absent feature columns as 0");
    }
    FeatureMatrix::new(feature_columns.to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn frame(csv: &str) -> DataFrame {
        frame::read_csv(csv.as_bytes()).unwrap()
    }

    fn numeric(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        frame::numeric(df, name).unwrap()
    }

    #[test]
    fn test_select_columns_drops_unknown() {
        let raw = frame(
            "TransactionID,TransactionDT,TransactionAmt,V1,id_01,isFraud\n1,0,10,5,1,0\n",
        );

        let selected = select_columns(&raw, false).unwrap();
        assert_eq!(
            frame::column_names(&selected),
            vec!["TransactionID", "TransactionDT", "TransactionAmt", "id_01"]
        );

        let with_label = select_columns(&raw, true).unwrap();
        assert!(frame::contains(&with_label, IS_FRAUD));
    }

    #[test]
    fn test_select_columns_keeps_rows_and_cells() {
        let raw = frame("V1,card4,TransactionAmt\n1,visa,10\n2,,20\n");
        let selected = select_columns(&raw, true).unwrap();

        assert_eq!(selected.height(), 2);
        assert_eq!(frame::column_names(&selected), vec!["TransactionAmt", "card4"]);
        assert_eq!(numeric(&selected, TRANSACTION_AMT), vec![Some(10.0), Some(20.0)]);
        assert_eq!(frame::null_mask(selected.column("card4").unwrap()), vec![false, true]);
    }

    #[test]
    fn test_validate_required_columns() {
        assert!(matches!(
            validate_required(&frame("TransactionAmt\n1\n")),
            Err(Error::MissingColumn(c)) if c == TRANSACTION_DT
        ));
        assert!(matches!(
            validate_required(&frame("TransactionDT,TransactionAmt\nnoon,1\n")),
            Err(Error::NonNumericColumn(_))
        ));
    }

    #[test]
    fn test_add_hour() {
        let mut f = frame("TransactionDT,TransactionAmt\n86400,1\n90061,1\n,1\n");
        add_hour(&mut f).unwrap();
        assert_eq!(numeric(&f, HOUR), vec![Some(0.0), Some(1.0), None]);
    }

    #[test]
    fn test_impute_uses_recorded_then_local_median() {
        let mut f = frame("card1,addr1\n1,10\n,20\n3,\n5,40\n");
        let mut medians = BTreeMap::new();
        medians.insert("card1".to_string(), 100.0);

        impute_numeric(&mut f, &medians, MedianFallback::LocalBatch).unwrap();
        assert_eq!(numeric(&f, "card1")[1], Some(100.0));
        // addr1 has no recorded median: median of 10, 20, 40
        assert_eq!(numeric(&f, "addr1")[2], Some(20.0));
        assert_eq!(frame::column_names(&f), vec!["card1", "addr1"]);
    }

    #[test]
    fn test_missing_indicators_reflect_original_nullness() {
        let mut f = frame("id_01,id_12\n1,Found\n,\n3,NotFound\n");
        let masks = identity_null_masks(&f);
        let medians = fit_medians(&f);
        impute_numeric(&mut f, &medians, MedianFallback::LocalBatch).unwrap();
        fill_categorical(&mut f).unwrap();
        add_missing_indicators(&mut f, &masks).unwrap();

        assert_eq!(numeric(&f, "id_01_missing"), vec![Some(0.0), Some(1.0), Some(0.0)]);
        assert_eq!(numeric(&f, "id_12_missing"), vec![Some(0.0), Some(1.0), Some(0.0)]);
        assert_eq!(f.column("id_01").unwrap().null_count(), 0);
    }

    #[test]
    fn test_vocabulary_is_first_seen_order() {
        let mut f = frame("card4\nvisa\nmastercard\nvisa\nNA\namex\n");
        let categorical = fill_categorical(&mut f).unwrap();
        let vocab = fit_vocabularies(&f, &categorical).unwrap();
        assert_eq!(vocab["card4"], vec!["visa", "mastercard", "Unknown", "amex"]);

        encode_categoricals(&mut f, &categorical, &vocab).unwrap();
        assert_eq!(
            numeric(&f, "card4"),
            vec![Some(0.0), Some(1.0), Some(0.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn test_unseen_category_encodes_to_sentinel() {
        let mut vocab = BTreeMap::new();
        vocab.insert("card4".to_string(), vec!["visa".to_string()]);
        let mut f = frame("card4,id_30\nvisa,Android\ndiscover,iOS\n");
        let categorical = fill_categorical(&mut f).unwrap();
        encode_categoricals(&mut f, &categorical, &vocab).unwrap();

        assert_eq!(numeric(&f, "card4"), vec![Some(0.0), Some(-1.0)]);
        // No vocabulary recorded at all
        assert_eq!(numeric(&f, "id_30"), vec![Some(-1.0), Some(-1.0)]);
    }

    #[test]
    fn test_amount_features_are_batch_relative() {
        let mut f = frame("TransactionAmt,card1\n10,1\n30,1\n50,2\n");
        add_amount_features(&mut f).unwrap();

        let by_card = numeric(&f, AMOUNT_BY_CARD);
        assert!((by_card[0].unwrap() - 0.5).abs() < 1e-12);
        assert!((by_card[1].unwrap() - 1.5).abs() < 1e-12);
        assert!((by_card[2].unwrap() - 1.0).abs() < 1e-12);
        assert!((numeric(&f, AMOUNT_LOG)[0].unwrap() - 11f64.ln()).abs() < 1e-12);
        // No DeviceInfo column: ratio skipped
        assert!(!frame::contains(&f, AMOUNT_BY_DEVICE));
    }

    #[test]
    fn test_zero_group_mean_gives_zero_ratio() {
        let mut f = frame("TransactionAmt,card1\n0,1\n0,1\n");
        add_amount_features(&mut f).unwrap();
        assert_eq!(numeric(&f, AMOUNT_BY_CARD), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_align_injects_zero_columns() {
        let f = frame("b,a\n1,2\n3,4\n");
        let columns = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let matrix = align_columns(&f, &columns).unwrap();

        assert_eq!(matrix.columns(), columns.as_slice());
        assert_eq!(matrix.values().row(0).to_vec(), vec![2.0, 0.0, 1.0]);
        assert_eq!(matrix.values().row(1).to_vec(), vec![4.0, 0.0, 3.0]);
    }

    #[test]
    fn test_reconcile_dtypes() {
        let mut state = FeatureState::default();
        state.categorical_columns.push("card4".to_string());
        state.medians.insert("addr1".to_string(), 100.0);

        let mut f = frame("card4,addr1\n1,abc\n2,200\n");
        reconcile_dtypes(&mut f, &state).unwrap();
        assert!(!frame::is_numeric(f.column("card4").unwrap()));
        assert_eq!(
            frame::texts(f.column("card4").unwrap()).unwrap(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
        assert_eq!(numeric(&f, "addr1"), vec![None, Some(200.0)]);
    }
}
