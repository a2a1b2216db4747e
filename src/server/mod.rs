//! HTTP server: router, session middleware and lifecycle

pub mod lifecycle;
pub mod pages;
pub mod router;
pub mod session;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub use lifecycle::Server;
pub use router::{AppState, create_router};
pub use session::require_session;

/// Structured API error: `{"error": <kind>, "message": <text>}`
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    /// Create an error response
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// 404 with kind `not_found`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 400 with kind `bad_request`
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}
