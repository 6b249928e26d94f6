use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    #[error("Feature '{0}' not found")]
    NotFound(String),
    #[error("Feature '{0}' already exists")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidRequestBody(String),
    #[error("{0}")]
    InvalidFlagName(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Stored value for feature '{0}' is corrupted")]
    Corrupted(String),
    #[error("Feature service temporarily unavailable")]
    ServiceUnavailable,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlagError {
    /// Returns (error_code, status_code) for this error.
    fn error_metadata(&self) -> (&'static str, u16) {
        match self {
            FlagError::NotFound(_) => ("not_found", 404),
            FlagError::AlreadyExists(_) => ("already_exists", 409),
            FlagError::InvalidState(_) => ("invalid_state", 409),
            FlagError::InvalidRequestBody(_) => ("invalid_request_body", 400),
            FlagError::InvalidFlagName(_) => ("invalid_flag_name", 400),
            FlagError::Unauthorized(_) => ("unauthorized", 401),
            FlagError::Forbidden(_) => ("forbidden", 403),
            FlagError::RateLimited => ("rate_limited", 429),
            FlagError::Corrupted(_) => ("corrupted", 500),
            FlagError::Internal(_) => ("internal_error", 500),
            FlagError::ServiceUnavailable => ("service_unavailable", 503),
        }
    }

    /// Returns a short error code for canonical logging.
    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        self.error_metadata().1
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            FlagError::Internal(msg) => {
                tracing::error!("Internal server error: {}", msg);
                "An internal server error occurred".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.error_code(),
            }),
        )
            .into_response()
    }
}
