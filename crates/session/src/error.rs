//! Error types for the session engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Main error type for the session engine.
///
/// The first four variants are the failure taxonomy the transport
/// boundary reasons about; the rest wrap infrastructure sources.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or insufficient client input. Rejected locally, no
    /// state mutated.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Room, passcode, or member mismatch. Connection refused before
    /// admission.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// A dependency (directory lookup, backplane, durable log) is
    /// unavailable or timed out.
    #[error("transient infrastructure error: {message}")]
    TransientInfra { message: String },

    /// An event that cannot be reconciled with current room state.
    /// Treated as a logged no-op by callers, never fatal.
    #[error("consistency violation: {message}")]
    ConsistencyViolation { message: String },

    #[error("storage error: {0}")]
    Store(#[from] parley_database::StoreError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientInfra {
            message: message.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::Validation { .. } => StatusCode::BAD_REQUEST,
            SessionError::Auth { .. } => StatusCode::UNAUTHORIZED,
            SessionError::TransientInfra { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::ConsistencyViolation { .. }
            | SessionError::Store(_)
            | SessionError::Redis(_)
            | SessionError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "session error");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
