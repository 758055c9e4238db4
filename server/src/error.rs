use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kernel::ErrorBody;

/// Every way a conversion request can fail.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad file name, disallowed extension, missing form field or empty result set
    #[error("{0}")]
    Validation(String),
    #[error("File {file} exceeds {}MB limit", .limit / (1024 * 1024))]
    PayloadTooLarge { file: String, limit: u64 },
    #[error("Failed to convert {file} to {format}: {reason}")]
    Conversion {
        file: String,
        format: String,
        reason: String,
    },
    #[error("Failed to create zip file: {0}")]
    Archive(String),
    #[error("Failed to save file: {0}")]
    Storage(#[from] io::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Conversion { .. }
            | ServiceError::Archive(_)
            | ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<zip::result::ZipError> for ServiceError {
    fn from(e: zip::result::ZipError) -> Self {
        ServiceError::Archive(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!("{status}: {detail}");
        } else {
            tracing::warn!("{status}: {detail}");
        }
        (status, Json(ErrorBody { detail })).into_response()
    }
}
