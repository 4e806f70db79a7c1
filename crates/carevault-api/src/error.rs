//! API Error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use carevault_broker::{BackendError, BrokerError, KeyError, RetrievalError};
use carevault_ledger::{ContractError, LedgerError};

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// A retrieval or probe outcome. Carries its own status.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Status, code and caller-facing message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
            ApiError::Retrieval(e) => (
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.code(),
                e.public_message(),
            ),
            ApiError::Broker(e) => broker_parts(e),
        }
    }
}

fn broker_parts(err: &BrokerError) -> (StatusCode, &'static str, String) {
    match err {
        BrokerError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        BrokerError::Ledger(e) => ledger_parts(e),
        BrokerError::Backend(BackendError::InvalidInput(msg)) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        BrokerError::Backend(BackendError::NotFound(msg)) => {
            (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
        }
        BrokerError::Backend(e @ (BackendError::Unavailable(_) | BackendError::Timeout(_))) => {
            (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE", e.to_string())
        }
        BrokerError::Key(e @ KeyError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "KEY_SERVICE_UNAVAILABLE", e.to_string())
        }
        BrokerError::Key(KeyError::NoKeyMaterial { .. }) => {
            (StatusCode::NOT_FOUND, "NO_KEY_MATERIAL", err.to_string())
        }
        // Crypto and key-resolution detail stays in the log.
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error".to_string(),
        ),
    }
}

fn ledger_parts(err: &LedgerError) -> (StatusCode, &'static str, String) {
    match err {
        LedgerError::Contract(
            ContractError::OrgNotFound(_)
            | ContractError::ResourceNotFound(_)
            | ContractError::GrantNotFound { .. },
        ) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        LedgerError::Contract(ContractError::OrgExists(_) | ContractError::ResourceExists(_)) => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        LedgerError::Contract(_) | LedgerError::InvalidArguments { .. } => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
        }
        e if e.is_unavailable() => {
            (StatusCode::SERVICE_UNAVAILABLE, "LEDGER_UNAVAILABLE", err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "LEDGER_ERROR", err.to_string()),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!(%status, code, error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;
