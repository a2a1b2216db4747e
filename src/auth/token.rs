//! Credential Issuer
//!
//! Mints and verifies short-lived HS256 session tokens. Tokens are never
//! stored server-side: validity is a pure function of the signing secret
//! and the embedded expiry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::{Error, Result};

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject identity (lower-cased email)
    pub sub: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issued-at (Unix epoch seconds)
    pub iat: u64,
    /// Expires-at (Unix epoch seconds)
    pub exp: u64,
}

/// Signs and verifies session tokens with a process-wide secret
pub struct CredentialIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl CredentialIssuer {
    /// Create an issuer from raw secret bytes
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock in `verify_at`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Create an issuer from configuration.
    ///
    /// An unset secret falls back to a built-in value; verification stays on
    /// but the fallback is reported loudly on every start.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let (secret, is_fallback) = config.resolve_session_secret();
        if is_fallback {
            error!(
                "auth.session_secret is not set; session tokens are signed with the built-in fallback secret. \
                 Set PINCERNA_AUTH__SESSION_SECRET before exposing this server."
            );
        }
        Self::new(secret.as_bytes())
    }

    /// Issue a token for `identity` that expires `ttl` from now
    pub fn issue(&self, identity: &str, display_name: Option<&str>, ttl: Duration) -> Result<String> {
        self.issue_at(identity, display_name, ttl, unix_now())
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(
        &self,
        identity: &str,
        display_name: Option<&str>,
        ttl: Duration,
        now: u64,
    ) -> Result<String> {
        let claims = SessionClaims {
            sub: identity.to_string(),
            name: display_name.map(str::to_string),
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Failed to sign session token: {e}")))
    }

    /// Verify a token against the current time
    pub fn verify(&self, token: &str) -> std::result::Result<SessionClaims, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a token as if the current time were `now`
    pub fn verify_at(&self, token: &str, now: u64) -> std::result::Result<SessionClaims, AuthError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Session token failed validation");
                AuthError::Malformed
            })?;

        if now > data.claims.exp {
            return Err(AuthError::Expired);
        }

        Ok(data.claims)
    }
}

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
