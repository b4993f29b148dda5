//! Error types for the expiry engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the expiry engine and its HTTP surface.
///
/// TTL computation never fails; these variants cover configuration,
/// request validation and the transaction commit hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Expiry policy rejected at configuration time
    #[error("Invalid expiry policy: {0}")]
    InvalidPolicy(String),

    /// Cache configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transaction aborted at commit because a key changed underneath it
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidPolicy(_)
            | CacheError::InvalidConfig(_)
            | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::TransactionConflict(_) => StatusCode::CONFLICT,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the expiry engine.
pub type Result<T> = std::result::Result<T, CacheError>;
