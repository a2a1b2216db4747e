//! Session middleware
//!
//! Applied at route registration to every protected route. A valid token
//! puts its [`SessionClaims`](crate::auth::SessionClaims) into the request
//! extensions; anything else is answered with 401 before the handler runs.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::ApiError;
use super::router::AppState;

/// Token from the `Authorization` header, with or without a `Bearer ` prefix
pub fn session_token(request: &Request<Body>) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Reject requests without a valid session token
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = session_token(&request) else {
        debug!(path = %path, "Missing session token");
        return unauthorized(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "Authorization header required",
        ));
    };

    match state.issuer.verify(token) {
        Ok(claims) => {
            debug!(path = %path, sub = %claims.sub, "Authenticated request");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(event = "token.rejected", path = %path, reason = e.kind(), "Session token rejected");
            unauthorized(ApiError::new(StatusCode::UNAUTHORIZED, e.kind(), e.to_string()))
        }
    }
}

fn unauthorized(error: ApiError) -> Response {
    let mut response = error.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        axum::http::HeaderValue::from_static("Bearer"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/cloud/api/auth/me");
        if let Some(v) = auth {
            builder = builder.header(header::AUTHORIZATION, v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(session_token(&request(Some("Bearer abc"))), Some("abc"));
        assert_eq!(session_token(&request(Some("bearer abc"))), Some("abc"));
        assert_eq!(session_token(&request(Some("abc"))), Some("abc"));
    }

    #[test]
    fn empty_or_missing_is_none() {
        assert_eq!(session_token(&request(None)), None);
        assert_eq!(session_token(&request(Some("Bearer "))), None);
        assert_eq!(session_token(&request(Some("  "))), None);
    }
}
