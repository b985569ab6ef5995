use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures talking to the remote media store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}")]
    Transport(String),

    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response from storage: {0}")]
    InvalidResponse(String),

    #[error("Upload buffer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage is not configured: missing {0}")]
    NotConfigured(String),
}

/// Everything that can end an intake request early
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Shop Name is required")]
    MissingField,

    #[error("{0}")]
    UnsupportedType(String),

    #[error("File too large. Maximum size is {} MB", .max_bytes / (1024 * 1024))]
    TooLarge { max_bytes: usize },

    #[error("Invalid upload request: {0}")]
    MalformedBody(String),

    #[error("Invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Failed to upload file: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to list uploads: {0}")]
    Listing(StorageError),
}

impl IntakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            IntakeError::Storage(_) | IntakeError::Listing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            IntakeError::MissingFile => "missing_file",
            IntakeError::EmptyFile => "empty_file",
            IntakeError::MissingField => "missing_field",
            IntakeError::UnsupportedType(_) => "unsupported_type",
            IntakeError::TooLarge { .. } => "too_large",
            IntakeError::MalformedBody(_) => "malformed_body",
            IntakeError::InvalidDate(_) => "invalid_date",
            IntakeError::Storage(_) => "storage_error",
            IntakeError::Listing(_) => "listing_error",
        }
    }
}

/// Body of every failed response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_bad_request() {
        for err in [
            IntakeError::MissingFile,
            IntakeError::EmptyFile,
            IntakeError::MissingField,
            IntakeError::UnsupportedType("nope".to_string()),
            IntakeError::TooLarge { max_bytes: 1024 },
            IntakeError::MalformedBody("bad".to_string()),
            IntakeError::InvalidDate("2025-13-01".to_string()),
        ] {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn test_storage_error_message_keeps_cause() {
        let err = IntakeError::from(StorageError::Transport("connection reset".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to upload file: connection reset");

        let err = IntakeError::from(StorageError::Rejected {
            status: 401,
            message: "Invalid api_key".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Failed to upload file: Invalid api_key (HTTP 401)"
        );
    }

    #[test]
    fn test_too_large_message() {
        let err = IntakeError::TooLarge {
            max_bytes: 10 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "File too large. Maximum size is 10 MB");
    }
}
