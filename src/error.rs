//! Error type shared by handlers, filters and the two-factor machinery.
//!
//! Every variant maps onto an HTTP status and a numeric `errorCode` so that
//! clients receive the same `{errorCode, message, httpStatus}` envelope for
//! every failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("Token not found or expired")]
    TokenNotFoundOrExpired,
    #[error("Duplicate submission; retry after {ttl_secs}s")]
    DuplicateSubmission { ttl_secs: u64 },
    #[error("Request too large ({0})")]
    PayloadTooLarge(String),
    #[error("Response filter {name} failed: {message}")]
    Filter { name: String, message: String },
    #[error("Storage failure: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::TokenNotFoundOrExpired => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateSubmission { .. } => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Filter { .. } | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 4000,
            AppError::Unauthorized => 2001,
            AppError::NotFound(_) => 4040,
            AppError::TokenNotFoundOrExpired => 4041,
            AppError::DuplicateSubmission { .. } => 4090,
            AppError::PayloadTooLarge(_) => 4001,
            AppError::Storage(_) => 5000,
            AppError::Filter { .. } => 5001,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error_code: self.error_code(),
            message: self.to_string(),
            http_status: self.status().as_u16(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(self.to_response_body())).into_response()
    }
}
