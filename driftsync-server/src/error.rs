//! Server error types mapped to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use driftsync_core::TokenError;

/// API error taxonomy.
///
/// `Database` details are logged but never echoed to clients.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid or expired credentials, device mismatch, unverified email.
    Auth(String),
    /// Duplicate email/username.
    Conflict(String),
    /// Missing, deleted, or not owned by the caller. Never reveals
    /// whether another user's resource exists.
    NotFound(String),
    /// Malformed or oversized payload, rejected before persistence.
    Validation(String),
    RateLimited,
    PayloadTooLarge,
    BadRequest(String),
    Database(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "Auth error: {}", e),
            Self::Conflict(e) => write!(f, "Conflict: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::Validation(e) => write!(f, "Validation error: {}", e),
            Self::RateLimited => write!(f, "Rate limited"),
            Self::PayloadTooLarge => write!(f, "Payload too large"),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Auth(e) => (StatusCode::UNAUTHORIZED, e.clone()),
            Self::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            Self::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.clone()),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()),
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload too large".to_string(),
            ),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            Self::Database(e) => {
                tracing::error!(error = %e, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        Self::Auth(e.to_string())
    }
}
