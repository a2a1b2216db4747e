//! Error types for Pincerna

use std::io;

use thiserror::Error;

/// Result type alias for Pincerna
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Session token verification failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The embedded expiry instant has passed
    #[error("session token expired")]
    Expired,

    /// Signature or structure did not validate
    #[error("session token malformed")]
    Malformed,
}

impl AuthError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Expired => "expired_token",
            Self::Malformed => "malformed_token",
        }
    }
}

/// Why a login attempt was refused.
///
/// Every variant maps to its own user-facing message so the denial view can
/// tell the operator exactly what went wrong.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    /// State unknown, already consumed, or past its lifetime
    #[error("login session expired")]
    SessionExpired,

    /// The user declined consent at the provider
    #[error("login cancelled")]
    Cancelled,

    /// Provider error or failed exchange
    #[error("login failed")]
    Failed,

    /// The identity carried no verified email
    #[error("email missing or unverified")]
    EmailUnverified,

    /// Verified email is not on the allow list
    #[error("account not allowed")]
    NotAllowed,

    /// Identity token was minted for another client
    #[error("token audience mismatch")]
    AudienceMismatch,
}

impl DeniedReason {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::EmailUnverified => "email_unverified",
            Self::NotAllowed => "forbidden",
            Self::AudienceMismatch => "audience_mismatch",
        }
    }

    /// Message shown on the denial page
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::SessionExpired => "Your sign-in session expired. Please start again.",
            Self::Cancelled => "Sign-in was cancelled.",
            Self::Failed => "Sign-in failed. Please try again.",
            Self::EmailUnverified => "Your account email is missing or not verified.",
            Self::NotAllowed => "This account is not allowed to access this server.",
            Self::AudienceMismatch => "The identity token was not issued for this server.",
        }
    }
}

/// Login flow cannot start because of missing settings
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `auth.client_id` is not configured
    #[error("OAuth client credentials are not configured")]
    MissingClientCredentials,

    /// `auth.authorize_url` does not parse as a URL
    #[error("authorization endpoint is not a valid URL")]
    InvalidAuthorizeUrl,

    /// The pending-flow side file cannot be written
    #[error("pending flow state directory is not writable")]
    StateDirUnwritable,
}

impl ConfigError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::MissingClientCredentials => "missing_client_credentials",
            Self::InvalidAuthorizeUrl => "invalid_authorize_url",
            Self::StateDirUnwritable => "state_dir_unwritable",
        }
    }
}

/// Sandboxed path resolution failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// Resolved path escapes the configured root
    #[error("path is outside the configured root")]
    OutsideRoot,
}

impl PathError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::OutsideRoot => "outside_root",
        }
    }
}
