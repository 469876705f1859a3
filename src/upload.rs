//! Assembly of uploaded CSV files into one frame.
//!
//! Clients send either a pre-merged file or a transaction file with an
//! optional identity file, which is left-joined on `TransactionID`.

use crate::error::{Error, Result};
use crate::frame;
use crate::types::transaction::TRANSACTION_ID;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

pub const FIELD_MERGED: &str = "file_merged";
pub const FIELD_TRANSACTION: &str = "file_transaction";
pub const FIELD_IDENTITY: &str = "file_identity";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilePart {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// File fields of one multipart request.
#[derive(Debug, Clone, Default)]
pub struct UploadedFiles {
    pub merged: Option<FilePart>,
    pub transaction: Option<FilePart>,
    pub identity: Option<FilePart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Merged,
    Transaction,
    Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub field: String,
    pub filename: Option<String>,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub files: Vec<UploadedFile>,
    pub dataset_type: DatasetType,
}

impl UploadMeta {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

#[derive(Debug, Clone)]
pub struct UploadedDataset {
    pub frame: DataFrame,
    pub meta: UploadMeta,
}

fn parse(field: &str, part: &FilePart) -> Result<DataFrame> {
    frame::read_csv(&part.bytes)
        .map_err(|e| Error::InvalidUpload(format!("Could not read {}: {}", field, e)))
}

impl UploadedFiles {
    /// Store a file under its form field name; `false` for unknown fields.
    pub fn set(&mut self, field: &str, part: FilePart) -> bool {
        let slot = match field {
            FIELD_MERGED => &mut self.merged,
            FIELD_TRANSACTION => &mut self.transaction,
            FIELD_IDENTITY => &mut self.identity,
            _ => return false,
        };
        *slot = Some(part);
        true
    }

    fn meta_files(&self) -> Vec<UploadedFile> {
        [
            (FIELD_MERGED, &self.merged),
            (FIELD_TRANSACTION, &self.transaction),
            (FIELD_IDENTITY, &self.identity),
        ]
        .into_iter()
        .filter_map(|(field, part)| {
            part.as_ref().map(|p| UploadedFile {
                field: field.to_string(),
                filename: p.filename.clone(),
                size_bytes: p.bytes.len(),
            })
        })
        .collect()
    }

    /// Parse and merge the uploaded files. Identity-only uploads are accepted
    /// unless `require_transaction` is set.
    pub fn into_dataset(self, require_transaction: bool) -> Result<UploadedDataset> {
        let files = self.meta_files();
        let dataset = |frame, dataset_type| UploadedDataset {
            frame,
            meta: UploadMeta {
                files: files.clone(),
                dataset_type,
            },
        };

        if let Some(merged) = &self.merged {
            return Ok(dataset(parse(FIELD_MERGED, merged)?, DatasetType::Merged));
        }

        match (&self.transaction, &self.identity) {
            (None, None) => Err(Error::InvalidUpload(
                "Provide file_merged or file_transaction.".to_string(),
            )),
            (Some(transaction), Some(identity)) => {
                let transaction = parse(FIELD_TRANSACTION, transaction)?;
                let identity = parse(FIELD_IDENTITY, identity)?;
                let merged = frame::left_join(&transaction, &identity, TRANSACTION_ID)?;
                Ok(dataset(merged, DatasetType::Merged))
            }
            (Some(transaction), None) => Ok(dataset(
                parse(FIELD_TRANSACTION, transaction)?,
                DatasetType::Transaction,
            )),
            (None, Some(identity)) if !require_transaction => Ok(dataset(
                parse(FIELD_IDENTITY, identity)?,
                DatasetType::Identity,
            )),
            (None, Some(_)) => Err(Error::InvalidUpload(
                "Provide file_transaction (transaction data required for prediction).".to_string(),
            )),
        }
    }
}
