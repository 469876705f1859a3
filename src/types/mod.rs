//! Type definitions for the fraud detection service

pub mod prediction;
pub mod transaction;

pub use prediction::{PredictionResponse, PredictionRow, PredictionSummary};
pub use transaction::TransactionRecord;
