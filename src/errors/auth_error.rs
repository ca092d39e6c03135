use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::FailureKind;

/// Result type for upgrade authentication
pub type AuthResult<T> = Result<T, AuthError>;

/// Reasons an upgrade request is refused before any protocol message is exchanged.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request signature or its inputs did not pass the gate
    #[error("Authentication failed ({kind}): {message}")]
    Rejected { kind: FailureKind, message: String },

    /// The upgrade carried no `audiohook-session-id` header
    #[error("Missing \"audiohook-session-id\" header field")]
    MissingSessionId,

    /// Server-side misconfiguration while authenticating
    #[error("Authentication configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Rejected { .. } => StatusCode::UNAUTHORIZED,
            AuthError::MissingSessionId => StatusCode::BAD_REQUEST,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Never echo signature internals back to the caller
        let message = match &self {
            AuthError::Rejected { .. } => "Unauthorized".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
