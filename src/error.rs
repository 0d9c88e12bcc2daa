//! Error taxonomy shared by the service and the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown task id, missing transcript file, missing conversation
    #[error("{0}")]
    NotFound(String),

    /// Transcription or reasoning API failure
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Disk or database error during persistence
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Client-side poll deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Metadata repository not configured
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Forbidden(String),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        // Keep a typed error if one is buried in the chain
        match err.downcast::<ServiceError>() {
            Ok(typed) => typed,
            Err(other) => ServiceError::Storage(format!("{:#}", other)),
        }
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// JSON body returned for every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
