//! HTTP error mapping

use crate::error::Error;
use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed upload, missing/non-numeric column or invalid parameter
    BadRequest(String),
    /// Explanation requested before any prediction
    EmptyCache(String),
    NotFound(String),
    /// Explanation requested for a batch that has been replaced
    StaleBatch(String),
    /// Training artifacts are not on disk yet
    ArtifactMissing(String),
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::EmptyCache(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::StaleBatch(_) => StatusCode::CONFLICT,
            ApiError::ArtifactMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::EmptyCache(_) => "empty_cache",
            ApiError::NotFound(_) => "not_found",
            ApiError::StaleBatch(_) => "stale_batch",
            ApiError::ArtifactMissing(_) => "artifact_missing",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error"
            }
            ApiError::BadRequest(msg)
            | ApiError::EmptyCache(msg)
            | ApiError::NotFound(msg)
            | ApiError::StaleBatch(msg)
            | ApiError::ArtifactMissing(msg) => msg.as_str(),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidUpload(_) | Error::MissingColumn(_) | Error::NonNumericColumn(_) => {
                ApiError::BadRequest(message)
            }
            Error::UnknownModelKey(_) => ApiError::NotFound(message),
            Error::EmptyCache => ApiError::EmptyCache(message),
            Error::StaleBatch { .. } => ApiError::StaleBatch(message),
            Error::MissingArtifact { .. } => ApiError::ArtifactMissing(message),
            Error::Training(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Shape(_)
            | Error::Polars(_)
            | Error::Internal(_) => ApiError::InternalError(message),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::InternalError(format!("Worker task failed: {}", err))
    }
}
