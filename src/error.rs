/// Unified error types for the access control plane
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum VpnError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credential/token failures: always the same generic message, the
    /// cause (wrong secret, unknown user, rotated token) must not leak
    #[error("Authentication failed")]
    Authentication,

    /// Valid identity but the account may not act (locked/closed)
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// No currently active, non-expired subscription
    #[error("Subscription required")]
    SubscriptionRequired,

    /// Device count would exceed the plan's device limit
    #[error("Device limit of {0} reached")]
    DeviceLimitExceeded(i64),

    /// Derived address already in use by another device
    #[error("Address collision: {0}")]
    AddressCollision(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate public key)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Registry (external store) errors; callers swallow and log these
    #[error("Registry error: {0}")]
    Registry(String),

    /// Token signing/encoding errors
    #[error("Token error: {0}")]
    Token(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert VpnError to HTTP response
impl IntoResponse for VpnError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            VpnError::Authentication => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationFailed",
                self.to_string(),
            ),
            VpnError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                self.to_string(),
            ),
            VpnError::SubscriptionRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "SubscriptionRequired",
                self.to_string(),
            ),
            VpnError::DeviceLimitExceeded(_) => (
                StatusCode::FORBIDDEN,
                "DeviceLimitExceeded",
                self.to_string(),
            ),
            VpnError::AddressCollision(_) => (
                StatusCode::CONFLICT,
                "AddressCollision",
                self.to_string(),
            ),
            VpnError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            VpnError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            VpnError::Conflict(_) => (
                StatusCode::CONFLICT,
                "Conflict",
                self.to_string(),
            ),
            VpnError::Database(_)
            | VpnError::Registry(_)
            | VpnError::Token(_)
            | VpnError::Internal(_)
            | VpnError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for control-plane operations
pub type VpnResult<T> = Result<T, VpnError>;
