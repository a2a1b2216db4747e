//! Externally visible request origin
//!
//! The redirect URI sent to the provider must be the same string in the
//! authorization request and in the token exchange, and it must name the
//! host the browser actually used, not the address we are bound to.

use axum::http::{HeaderMap, Uri, header};

/// Scheme and authority as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOrigin {
    scheme: String,
    host: String,
}

impl ExternalOrigin {
    /// Build an origin from explicit parts
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// Derive the origin from request headers.
    ///
    /// Host precedence: `X-Forwarded-Host`, `Host`, URI authority.
    /// Scheme precedence: `X-Forwarded-Proto`, URI scheme, `http`.
    /// Proxies may append lists (`a, b`); the first hop is the client-facing one.
    #[must_use]
    pub fn from_request(headers: &HeaderMap, uri: &Uri) -> Option<Self> {
        let host = first_value(headers, "x-forwarded-host")
            .or_else(|| first_value(headers, header::HOST.as_str()))
            .or_else(|| uri.authority().map(|a| a.as_str().to_string()))?;

        let scheme = first_value(headers, "x-forwarded-proto")
            .or_else(|| uri.scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string())
            .to_ascii_lowercase();

        Some(Self { scheme, host })
    }

    /// `scheme://host`
    #[must_use]
    pub fn base(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Absolute URL for `path` on this origin
    #[must_use]
    pub fn redirect_uri(&self, path: &str) -> String {
        format!("{}{}", self.base(), path)
    }
}

fn first_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
