//! Multipart form extraction

use crate::api::error::ApiResult;
use crate::upload::{FilePart, UploadedFiles, FIELD_IDENTITY, FIELD_MERGED, FIELD_TRANSACTION};
use axum::extract::Multipart;
use std::collections::HashMap;
use tracing::debug;

/// File parts and plain text fields of one multipart request.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub files: UploadedFiles,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
    }
}

fn is_file_field(name: &str) -> bool {
    matches!(name, FIELD_MERGED | FIELD_TRANSACTION | FIELD_IDENTITY)
}

pub async fn read_multipart(mut multipart: Multipart) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if is_file_field(&name) {
            let filename = field.file_name().map(str::to_string);
            let bytes = field.bytes().await?;
            // Browsers send an empty part for an untouched file input
            if bytes.is_empty() {
                continue;
            }
            debug!(field = %name, size = bytes.len(), "Received upload");
            form.files.set(&name, FilePart {
                filename,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}
