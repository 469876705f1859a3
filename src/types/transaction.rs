//! Raw transaction schema and a row view over uploaded data

use crate::frame;
use polars::prelude::{AnyValue, DataFrame};

/// Numeric transaction identifier, also the join key between files.
pub const TRANSACTION_ID: &str = "TransactionID";
/// Seconds from a reference point.
pub const TRANSACTION_DT: &str = "TransactionDT";
pub const TRANSACTION_AMT: &str = "TransactionAmt";
/// Training label (1 = fraud).
pub const IS_FRAUD: &str = "isFraud";

pub const PRODUCT_CD: &str = "ProductCD";
pub const CARD1: &str = "card1";
pub const CARD4: &str = "card4";
pub const ADDR1: &str = "addr1";
pub const P_EMAILDOMAIN: &str = "P_emaildomain";
pub const R_EMAILDOMAIN: &str = "R_emaildomain";
pub const DEVICE_TYPE: &str = "DeviceType";
pub const DEVICE_INFO: &str = "DeviceInfo";

/// Derived columns created by the feature pipeline.
pub const HOUR: &str = "hour";
pub const AMOUNT_LOG: &str = "TransactionAmt_log";
pub const AMOUNT_BY_CARD: &str = "TransactionAmt_by_card1";
pub const AMOUNT_BY_DEVICE: &str = "TransactionAmt_by_device";
pub const MISSING_SUFFIX: &str = "_missing";

/// Raw columns retained by column selection (identity columns are added by pattern).
pub const BASE_COLUMNS: [&str; 16] = [
    TRANSACTION_ID,
    TRANSACTION_DT,
    TRANSACTION_AMT,
    PRODUCT_CD,
    CARD1,
    "card2",
    "card3",
    CARD4,
    "card5",
    "card6",
    ADDR1,
    "addr2",
    P_EMAILDOMAIN,
    R_EMAILDOMAIN,
    DEVICE_TYPE,
    DEVICE_INFO,
];

/// Columns the pipeline synthesizes when the upload lacks them.
pub const DERIVED_COLUMNS: [&str; 4] = [HOUR, AMOUNT_LOG, AMOUNT_BY_CARD, AMOUNT_BY_DEVICE];

/// Identity columns are recognised by name, not by a fixed list.
pub fn is_identity_column(name: &str) -> bool {
    name.contains("id_")
}

/// Whether column selection keeps a raw column.
pub fn is_known_column(name: &str) -> bool {
    BASE_COLUMNS.contains(&name) || is_identity_column(name)
}

/// Hour of day for a timestamp in seconds, in `[0, 24)`.
pub fn hour_of_day(seconds: f64) -> i8 {
    (seconds / 3600.0).rem_euclid(24.0).floor() as i8
}

/// Borrowed view of one transaction row.
#[derive(Debug, Clone, Copy)]
pub struct TransactionRecord<'a> {
    df: &'a DataFrame,
    row: usize,
}

impl<'a> TransactionRecord<'a> {
    /// View of `row`, or `None` when out of range.
    pub fn new(df: &'a DataFrame, row: usize) -> Option<Self> {
        (row < df.height()).then_some(Self { df, row })
    }

    fn cell(&self, column: &str) -> Option<AnyValue<'a>> {
        self.df.column(column).ok()?.get(self.row).ok()
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        match self.cell(column)? {
            AnyValue::Float64(v) => Some(v).filter(|v| !v.is_nan()),
            _ => None,
        }
    }

    pub fn text(&self, column: &str) -> Option<String> {
        frame::cell_string(self.df.column(column).ok()?, self.row)
    }

    /// JSON rendering of a cell: numbers stay numbers, nulls become `null`.
    pub fn value(&self, column: &str) -> serde_json::Value {
        match self.cell(column) {
            Some(AnyValue::Float64(v)) if v.is_finite() => serde_json::Value::from(v),
            Some(AnyValue::String(s)) => serde_json::Value::from(s),
            Some(AnyValue::StringOwned(s)) => serde_json::Value::from(s.as_str()),
            _ => serde_json::Value::Null,
        }
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.text(TRANSACTION_ID)
    }

    pub fn amount(&self) -> Option<f64> {
        self.number(TRANSACTION_AMT)
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.number(TRANSACTION_DT)
    }

    /// Hour column when uploaded, otherwise derived from the timestamp.
    pub fn hour(&self) -> Option<i8> {
        self.number(HOUR)
            .map(|h| h as i8)
            .or_else(|| self.timestamp().map(hour_of_day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_of_day() {
        assert_eq!(hour_of_day(0.0), 0);
        assert_eq!(hour_of_day(3600.0 * 25.0 + 10.0), 1);
        assert_eq!(hour_of_day(86_399.0), 23);
        // Negative offsets wrap into the previous day
        assert_eq!(hour_of_day(-3600.0), 23);
    }

    #[test]
    fn test_known_columns() {
        assert!(is_known_column("card4"));
        assert!(is_known_column("id_31"));
        assert!(!is_known_column("V1"));
        assert!(!is_known_column(IS_FRAUD));
    }

    #[test]
    fn test_record_view() {
        let csv = "TransactionID,TransactionDT,TransactionAmt,card4\n3000001,90000,49.5,visa\n";
        let df = frame::read_csv(csv.as_bytes()).unwrap();

        let record = TransactionRecord::new(&df, 0).unwrap();
        assert_eq!(record.transaction_id().as_deref(), Some("3000001"));
        assert_eq!(record.amount(), Some(49.5));
        assert_eq!(record.hour(), Some(1));
        assert_eq!(record.value(CARD4), serde_json::json!("visa"));
        assert_eq!(record.value(DEVICE_INFO), serde_json::Value::Null);
        assert_eq!(record.number(CARD4), None);
        assert!(TransactionRecord::new(&df, 1).is_none());
    }
}
