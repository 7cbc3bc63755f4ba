//! Error handling module
//!
//! Centralized error types and HTTP response conversion. The request layer
//! owns user-visible wording: precondition failures map to a rejected
//! transfer with a reason; storage faults map to a generic "try again
//! later" with no internal detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::TransferError;
use crate::ledger::IdempotencyKeyError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    // Engine errors
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    IdempotencyKey(#[from] IdempotencyKeyError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => (
                StatusCode::BAD_REQUEST,
                "missing_header",
                Some(header.to_string()),
            ),
            AppError::IdempotencyKey(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_idempotency_key",
                Some(e.to_string()),
            ),

            AppError::Transfer(err) => {
                let status = match err {
                    TransferError::InvalidAmount(_)
                    | TransferError::SameAccount
                    | TransferError::InsufficientFunds { .. }
                    | TransferError::AccountNotActive { .. } => StatusCode::BAD_REQUEST,
                    TransferError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                    TransferError::Unauthorized => StatusCode::FORBIDDEN,
                    TransferError::LockTimeout => StatusCode::CONFLICT,
                    TransferError::PersistenceFailure(_) | TransferError::InconsistentState(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };

                // Internal storage detail stays out of the response body.
                let details = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Transfer failed: {err}");
                    None
                } else {
                    Some(err.to_string())
                };

                (status, err.code(), details)
            }

            AppError::Store(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred. Please try again later.".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;

    #[test]
    fn test_transfer_error_status_mapping() {
        let cases = [
            (TransferError::SameAccount, StatusCode::BAD_REQUEST),
            (
                TransferError::AccountNotFound(AccountId::new()),
                StatusCode::NOT_FOUND,
            ),
            (TransferError::Unauthorized, StatusCode::FORBIDDEN),
            (TransferError::LockTimeout, StatusCode::CONFLICT),
            (
                TransferError::PersistenceFailure("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                TransferError::InconsistentState("drift".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::Transfer(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let response =
            AppError::Transfer(TransferError::PersistenceFailure("disk on fire".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
