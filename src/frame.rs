//! Table helpers over polars [`DataFrame`]s shared by the pipeline, the
//! reports and the API.
//!
//! Every CSV column is normalized on read: numeric and all-null columns
//! become `Float64`, everything else stays text. Cells listed in
//! [`NULL_TOKENS`] are read as nulls.

use crate::error::{Error, Result};
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;

/// Cell spellings treated as null when reading CSV input.
pub const NULL_TOKENS: [&str; 9] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "<NA>"];

const ROW_ORDER: &str = "__row_order";

fn read_options() -> CsvReadOptions {
    let null_values: Vec<PlSmallStr> = NULL_TOKENS.iter().map(|token| (*token).into()).collect();
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|options| {
            options.with_null_values(Some(NullValues::AllColumns(null_values.clone())))
        })
}

fn normalize_column(column: &Column) -> PolarsResult<Column> {
    let dtype = column.dtype();
    if column.null_count() == column.len() || dtype.is_primitive_numeric() {
        column.cast(&DataType::Float64)
    } else if dtype == &DataType::Boolean {
        column.cast(&DataType::String)
    } else {
        Ok(column.clone())
    }
}

fn normalize(df: DataFrame) -> Result<DataFrame> {
    let columns = df
        .get_columns()
        .iter()
        .map(normalize_column)
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Parse CSV bytes with a header row.
pub fn read_csv(bytes: &[u8]) -> Result<DataFrame> {
    let df = read_options()
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()?;
    normalize(df)
}

pub fn read_csv_path<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = std::fs::File::open(path.as_ref())?;
    let df = read_options().into_reader_with_file_handle(file).finish()?;
    normalize(df)
}

/// Left join on a shared key column.
///
/// Every left row is kept in its original order; a left row matching several
/// right rows is repeated once per match. Clashing non-key column names get
/// `_x`/`_y` suffixes.
pub fn left_join(left: &DataFrame, right: &DataFrame, on: &str) -> Result<DataFrame> {
    let left_key = left.column(on).map_err(|_| {
        Error::InvalidUpload(format!("Join key {} missing from transaction data", on))
    })?;
    let right_key = right.column(on).map_err(|_| {
        Error::InvalidUpload(format!("Join key {} missing from identity data", on))
    })?;

    let mut right = right.clone();
    if right_key.dtype() != left_key.dtype() {
        let cast = right_key.cast(left_key.dtype())?;
        right.with_column(cast)?;
    }

    let mut left = left.clone();
    let clashing: Vec<String> = column_names(&left)
        .into_iter()
        .filter(|name| *name != on && contains(&right, name))
        .map(str::to_string)
        .collect();
    for name in &clashing {
        left.rename(name, format!("{}_x", name).into())?;
        right.rename(name, format!("{}_y", name).into())?;
    }

    let joined = left
        .with_row_index(ROW_ORDER.into(), None)?
        .lazy()
        .join(right.lazy(), [col(on)], [col(on)], JoinArgs::new(JoinType::Left))
        .sort([ROW_ORDER], SortMultipleOptions::default().with_maintain_order(true))
        .collect()?;
    Ok(joined.drop(ROW_ORDER)?)
}

pub fn column_names(df: &DataFrame) -> Vec<&str> {
    df.get_columns().iter().map(|c| c.name().as_str()).collect()
}

pub fn contains(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn is_numeric(column: &Column) -> bool {
    column.dtype().is_primitive_numeric()
}

/// Numeric cells of a column, NaN read as null; `None` for text columns.
pub fn numbers(column: &Column) -> Option<Vec<Option<f64>>> {
    if !is_numeric(column) {
        return None;
    }
    let floats = column.cast(&DataType::Float64).ok()?;
    let values = floats.f64().ok()?;
    Some(values.iter().map(|v| v.filter(|x| !x.is_nan())).collect())
}

/// Numeric cells of a required column.
pub fn numeric(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| Error::MissingColumn(name.to_string()))?;
    numbers(column).ok_or_else(|| Error::NonNumericColumn(name.to_string()))
}

/// Non-null numeric values in row order; empty for text columns.
pub fn observed_numbers(column: &Column) -> Vec<f64> {
    numbers(column)
        .map(|values| values.into_iter().flatten().collect())
        .unwrap_or_default()
}

/// Median of the observed values; 0.0 when there are none.
pub fn median(column: &Column) -> f64 {
    if !is_numeric(column) {
        return 0.0;
    }
    column
        .as_materialized_series()
        .median()
        .filter(|m| m.is_finite())
        .unwrap_or(0.0)
}

/// Text cells of a column; `None` for numeric columns.
pub fn texts(column: &Column) -> Option<Vec<Option<String>>> {
    let values = column.str().ok()?;
    Some(values.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Render a float the way identifiers are usually written (`3000001`, not `3000001.0`).
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// String rendering of a cell, `None` for nulls.
pub fn cell_string(column: &Column, row: usize) -> Option<String> {
    match column.get(row).ok()? {
        AnyValue::Null => None,
        AnyValue::Float64(v) if v.is_nan() => None,
        AnyValue::Float64(v) => Some(format_number(v)),
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        other => Some(other.to_string()),
    }
}

/// String rendering of every cell.
pub fn cell_strings(column: &Column) -> Vec<Option<String>> {
    match numbers(column) {
        Some(values) => values.into_iter().map(|v| v.map(format_number)).collect(),
        None => texts(column).unwrap_or_default(),
    }
}

/// `true` for every null cell.
pub fn null_mask(column: &Column) -> Vec<bool> {
    match numbers(column) {
        Some(values) => values.iter().map(Option::is_none).collect(),
        None => column.is_null().into_iter().map(|v| v.unwrap_or(true)).collect(),
    }
}

/// Number of distinct non-null values.
pub fn distinct_count(column: &Column) -> usize {
    let distinct = column.n_unique().unwrap_or(0);
    distinct.saturating_sub(usize::from(column.null_count() > 0))
}

/// Same cells rendered as text.
pub fn to_text(column: &Column) -> Column {
    Series::new(column.name().clone(), cell_strings(column)).into()
}

/// Same cells parsed as numbers; unparsable text becomes null.
pub fn to_numeric_lossy(column: &Column) -> Result<Column> {
    Ok(column.cast(&DataType::Float64)?)
}

pub fn float_column(name: &str, values: Vec<Option<f64>>) -> Column {
    Series::new(name.into(), values).into()
}

/// New frame holding the listed rows, in the listed order.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let indices: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("rows".into(), indices))?)
}
