//! Error types for the Kernex control plane

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_client::ErrorResponse;
use thiserror::Error;

use crate::blob::BlobError;

/// Main error type for the Kernex control plane
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// Error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Conflict(_) => "conflict",
            Self::Gone(_) => "gone",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gone(_) => StatusCode::GONE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<BlobError> for ControlPlaneError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Missing(key) => ControlPlaneError::Gone(format!("bundle file missing: {}", key)),
            BlobError::InvalidKey(key) => ControlPlaneError::InvalidRequest(key),
            BlobError::Io(e) => ControlPlaneError::Storage(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ControlPlaneError {
    fn from(err: std::io::Error) -> Self {
        ControlPlaneError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(err: serde_json::Error) -> Self {
        ControlPlaneError::Internal(format!("JSON encoding: {}", err))
    }
}

impl From<sqlx::Error> for ControlPlaneError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ControlPlaneError::NotFound("record".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ControlPlaneError::Conflict(db_err.message().to_string())
            }
            other => ControlPlaneError::Storage(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ControlPlaneError {
    fn from(err: anyhow::Error) -> Self {
        ControlPlaneError::Internal(err.to_string())
    }
}
