//! Bootstrap code login
//!
//! Lets the operator sign in with a shared access code before the identity
//! provider is configured. The email must still pass the allow list, and the
//! issued token is short-lived.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::allow_list::AllowList;
use super::token::CredentialIssuer;
use crate::config::AuthConfig;

/// Attempts admitted per minute across all clients
pub const ATTEMPTS_PER_MINUTE: u32 = 5;

type AttemptLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bootstrap login refusal
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    /// No access code configured
    #[error("code login is disabled")]
    Disabled,

    /// Too many attempts in the current window
    #[error("too many attempts")]
    RateLimited,

    /// Code did not match
    #[error("invalid access code")]
    InvalidCode,

    /// Email is not on the allow list
    #[error("account not allowed")]
    NotAllowed,
}

impl BootstrapError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Disabled => "code_login_disabled",
            Self::RateLimited => "rate_limited",
            Self::InvalidCode => "invalid_code",
            Self::NotAllowed => "forbidden",
        }
    }
}

/// Access-code login gate
pub struct BootstrapLogin {
    code: Option<String>,
    ttl: Duration,
    limiter: AttemptLimiter,
    allow_list: Arc<AllowList>,
    issuer: Arc<CredentialIssuer>,
}

impl BootstrapLogin {
    /// Create a gate; `code = None` disables it
    #[must_use]
    pub fn new(
        code: Option<String>,
        ttl: Duration,
        allow_list: Arc<AllowList>,
        issuer: Arc<CredentialIssuer>,
    ) -> Self {
        let per_minute = NonZeroU32::new(ATTEMPTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN);
        Self {
            code,
            ttl,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            allow_list,
            issuer,
        }
    }

    /// Build from configuration
    #[must_use]
    pub fn from_config(
        config: &AuthConfig,
        allow_list: Arc<AllowList>,
        issuer: Arc<CredentialIssuer>,
    ) -> Self {
        Self::new(
            config.resolve_bootstrap_code(),
            config.bootstrap_ttl,
            allow_list,
            issuer,
        )
    }

    /// Whether an access code is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.code.is_some()
    }

    /// Check `code` for `email` and issue a session token
    pub fn login(&self, email: &str, code: &str) -> Result<String, BootstrapError> {
        let Some(ref expected) = self.code else {
            return Err(BootstrapError::Disabled);
        };

        if self.limiter.check().is_err() {
            warn!(event = "login.denied", method = "code", reason = "rate_limited", "Login denied");
            return Err(BootstrapError::RateLimited);
        }

        let matches: bool = code.as_bytes().ct_eq(expected.as_bytes()).into();
        if !matches {
            warn!(event = "login.denied", method = "code", reason = "invalid_code", "Login denied");
            return Err(BootstrapError::InvalidCode);
        }

        let email = email.trim().to_lowercase();
        if !self.allow_list.is_allowed(&email) {
            warn!(event = "login.denied", method = "code", reason = "forbidden", "Login denied");
            return Err(BootstrapError::NotAllowed);
        }

        let token = self.issuer.issue(&email, None, self.ttl).map_err(|e| {
            warn!(error = %e, "Failed to issue session token");
            BootstrapError::InvalidCode
        })?;

        info!(event = "login.issued", method = "code", email = %email, "Session token issued");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(dir: &tempfile::TempDir, code: Option<&str>) -> (BootstrapLogin, Arc<CredentialIssuer>) {
        let path = dir.path().join("allowed_emails.json");
        std::fs::write(&path, r#"["ops@example.com"]"#).unwrap();
        let issuer = Arc::new(CredentialIssuer::new(b"secret"));
        let login = BootstrapLogin::new(
            code.map(str::to_string),
            Duration::from_secs(1800),
            Arc::new(AllowList::new(path, "admin@localhost")),
            issuer.clone(),
        );
        (login, issuer)
    }

    #[test]
    fn disabled_without_code() {
        let dir = tempfile::tempdir().unwrap();
        let (login, _) = gate(&dir, None);
        assert!(!login.is_enabled());
        assert_eq!(login.login("ops@example.com", ""), Err(BootstrapError::Disabled));
    }

    #[test]
    fn valid_code_issues_short_lived_token() {
        let dir = tempfile::tempdir().unwrap();
        let (login, issuer) = gate(&dir, Some("open-sesame"));

        let token = login.login("OPS@example.com", "open-sesame").unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "ops@example.com");
        assert_eq!(claims.exp - claims.iat, 1800);
    }

    #[test]
    fn wrong_code_and_unlisted_email_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (login, _) = gate(&dir, Some("open-sesame"));

        assert_eq!(
            login.login("ops@example.com", "open-sesam"),
            Err(BootstrapError::InvalidCode)
        );
        assert_eq!(
            login.login("stranger@example.com", "open-sesame"),
            Err(BootstrapError::NotAllowed)
        );
    }

    #[test]
    fn attempts_are_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let (login, _) = gate(&dir, Some("open-sesame"));

        for _ in 0..ATTEMPTS_PER_MINUTE {
            assert_eq!(login.login("ops@example.com", "nope"), Err(BootstrapError::InvalidCode));
        }
        assert_eq!(
            login.login("ops@example.com", "open-sesame"),
            Err(BootstrapError::RateLimited)
        );
    }
}
