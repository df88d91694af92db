//! HTTP error rendering for the gateway API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

/// API error types.
#[derive(Debug)]
pub enum ApiError {
    /// The request itself is unusable.
    BadRequest(String),
    /// An upstream flow failed.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
