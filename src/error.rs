//! API Error Taxonomy
//!
//! Every HTTP-facing failure in the system maps onto one of these variants,
//! which in turn map onto a status code and a `{"error": <message>}` JSON
//! body. Handlers return `Result<_, ApiError>` and let the `IntoResponse`
//! impl render the failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing key, invalid consistency level, malformed request body.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid API key.
    #[error("{0}")]
    Unauthenticated(String),

    /// The tenant's token bucket is empty.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// GET/DELETE on an absent or expired key.
    #[error("{0}")]
    NotFound(String),

    /// No ring nodes, unreachable peer, or full replication queue.
    #[error("{0}")]
    Unavailable(String),

    /// Strong-mode quorum not reached within the deadline.
    #[error("{0}")]
    Timeout(String),

    /// WAL write failure, encoding failure, other unexpected conditions.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Timeout("x".into()).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
