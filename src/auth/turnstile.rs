//! Cloudflare Turnstile verification

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::Result;
use crate::config::AuthConfig;

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Forwards widget tokens to the siteverify endpoint
pub struct TurnstileVerifier {
    http: Client,
    verify_url: String,
    secret: Option<String>,
}

impl TurnstileVerifier {
    /// Create a verifier; `secret = None` accepts every token
    pub fn new(verify_url: String, secret: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            verify_url,
            secret,
        })
    }

    /// Build from configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(
            config.turnstile_verify_url.clone(),
            config.resolve_turnstile_secret(),
            config.provider_timeout,
        )
    }

    /// Whether a secret is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify a widget token. Network or decode failures count as rejection.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use pincerna::auth::TurnstileVerifier;
    /// # tokio_test::block_on(async {
    /// let open = TurnstileVerifier::new(String::new(), None, Duration::from_secs(1)).unwrap();
    /// assert!(open.verify("anything", None).await);
    /// # });
    /// ```
    pub async fn verify(&self, token: &str, remote_ip: Option<&str>) -> bool {
        let Some(ref secret) = self.secret else {
            debug!("Turnstile secret not configured, accepting");
            return true;
        };
        if token.is_empty() {
            return false;
        }

        let mut form = vec![("secret", secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = match self.http.post(&self.verify_url).form(&form).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Turnstile verification request failed");
                return false;
            }
        };

        match response.json::<SiteVerifyResponse>().await {
            Ok(body) => {
                if !body.success {
                    debug!(errors = ?body.error_codes, "Turnstile rejected token");
                }
                body.success
            }
            Err(e) => {
                warn!(error = %e, "Unreadable Turnstile response");
                false
            }
        }
    }
}
