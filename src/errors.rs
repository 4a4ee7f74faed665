//! Gateway error types.
//!
//! Every variant maps to a short error code and an HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(GatewayError::NotFound(..))`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::metadata::store::StoreError;

/// Response header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Missing, malformed or unknown session, or a wrong object password.
    #[error("unauthorized")]
    Unauthorized,

    /// Login with a wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No matching user, session or object.
    #[error("{0}")]
    NotFound(String),

    /// Registration for an email that is already taken.
    #[error("{0}")]
    AlreadyExists(String),

    /// A uniqueness constraint rejected a write.
    #[error("{0}")]
    Conflict(String),

    /// Catch-all for store and backend failures.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "ValidationError",
            GatewayError::Unauthorized => "Unauthorized",
            GatewayError::InvalidCredentials => "InvalidCredentials",
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::AlreadyExists(_) => "AlreadyExists",
            // Uniqueness violations surface as validation failures.
            GatewayError::Conflict(_) => "ValidationError",
            GatewayError::Internal(_) => "InternalError",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
            GatewayError::Conflict(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => GatewayError::Conflict(detail),
            StoreError::Other(e) => GatewayError::Internal(e),
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if let GatewayError::Internal(ref e) = self {
            error!(request_id = %request_id, "internal error: {e:#}");
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            request_id: request_id.clone(),
        };
        (status, [(REQUEST_ID_HEADER, request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_16_hex_chars() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::AlreadyExists("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::Conflict("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::Conflict("x".into()).code(), "ValidationError");
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: GatewayError = StoreError::Conflict("objects.username".into()).into();
        assert!(matches!(err, GatewayError::Conflict(_)));
        let err: GatewayError = StoreError::Other(anyhow::anyhow!("disk full")).into();
        assert!(matches!(err, GatewayError::Internal(_)));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = GatewayError::Internal(anyhow::anyhow!("secret path /var/db"));
        assert_eq!(err.to_string(), "internal error");
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    }
}
