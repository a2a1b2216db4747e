//! Identity provider client
//!
//! Token endpoint exchange (authorization code + PKCE verifier) and ID token
//! introspection. Every call is bounded by the configured provider timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::AuthConfig;

/// Longest provider error body kept for logs, in characters
const MAX_ERROR_BODY: usize = 512;

/// Failure talking to the identity provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure or timeout
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("provider returned HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Token response carried no ID token
    #[error("token response has no id_token")]
    MissingIdToken,
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    /// OpenID Connect ID token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access token (unused beyond logging)
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Claims returned by the introspection endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityClaims {
    /// Audience the ID token was minted for
    #[serde(default)]
    pub aud: String,
    /// Subject
    #[serde(default)]
    pub sub: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the provider verified the email (bool or `"true"`)
    #[serde(default, deserialize_with = "bool_or_string")]
    pub email_verified: bool,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

fn bool_or_string<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// The two provider calls a login needs
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Exchange an authorization code for tokens
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError>;

    /// Resolve an ID token into verified claims
    async fn introspect(&self, id_token: &str) -> Result<IdentityClaims, ProviderError>;
}

/// HTTP implementation against an OAuth2 / OIDC provider
pub struct HttpIdentityProvider {
    http: Client,
    token_url: String,
    tokeninfo_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpIdentityProvider {
    /// Create a provider client with the given request timeout
    pub fn new(
        token_url: String,
        tokeninfo_url: String,
        client_id: String,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            token_url,
            tokeninfo_url,
            client_id,
            client_secret,
        })
    }

    /// Build from configuration; `Ok(None)` when no client id is configured
    pub fn from_config(config: &AuthConfig) -> crate::Result<Option<Self>> {
        let Some(client_id) = config.client_id.clone().filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        Self::new(
            config.token_url.clone(),
            config.tokeninfo_url.clone(),
            client_id,
            config.resolve_client_secret(),
            config.provider_timeout,
        )
        .map(Some)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = self.http.post(&self.token_url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = clip(response.text().await.unwrap_or_default());
            return Err(ProviderError::Status { status, body });
        }

        let tokens: TokenSet = response.json().await?;
        debug!(has_access_token = tokens.access_token.is_some(), "Exchanged authorization code");
        if tokens.id_token.is_none() {
            return Err(ProviderError::MissingIdToken);
        }
        Ok(tokens)
    }

    async fn introspect(&self, id_token: &str) -> Result<IdentityClaims, ProviderError> {
        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = clip(response.text().await.unwrap_or_default());
            return Err(ProviderError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

/// Cut `body` to at most [`MAX_ERROR_BODY`] characters
fn clip(mut body: String) -> String {
    if let Some((end, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response after reading the whole request
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/token")
    }

    fn provider(token_url: String) -> HttpIdentityProvider {
        HttpIdentityProvider::new(
            token_url.clone(),
            token_url,
            "client-123".to_string(),
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let body = format!("a{}", "é".repeat(600));
        let clipped = clip(body);
        assert_eq!(clipped.chars().count(), MAX_ERROR_BODY);
        assert!(clipped.starts_with('a'));

        assert_eq!(clip("short".to_string()), "short");
    }

    #[tokio::test]
    async fn multibyte_error_body_is_a_status_error() {
        let url = serve_once("HTTP/1.1 400 Bad Request", format!("a{}", "é".repeat(400))).await;

        let err = provider(url)
            .exchange_code("code", "verifier", "https://home.example.com/cb")
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn multibyte_introspection_error_is_a_status_error() {
        let url = serve_once("HTTP/1.1 400 Bad Request", "é".repeat(700)).await;

        let err = provider(url).introspect("id-token").await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 400, .. }));
    }

    #[test]
    fn email_verified_accepts_string_and_bool() {
        let claims: IdentityClaims = serde_json::from_str(
            r#"{"aud":"client","email":"a@example.com","email_verified":"true"}"#,
        )
        .unwrap();
        assert!(claims.email_verified);

        let claims: IdentityClaims =
            serde_json::from_str(r#"{"aud":"client","email_verified":false}"#).unwrap();
        assert!(!claims.email_verified);

        let claims: IdentityClaims = serde_json::from_str(r#"{"aud":"client"}"#).unwrap();
        assert!(!claims.email_verified);
        assert!(claims.email.is_none());
    }

    #[test]
    fn no_client_id_means_no_provider() {
        assert!(HttpIdentityProvider::from_config(&AuthConfig::default()).unwrap().is_none());

        let config = AuthConfig {
            client_id: Some("client-123".to_string()),
            ..AuthConfig::default()
        };
        assert!(HttpIdentityProvider::from_config(&config).unwrap().is_some());
    }

    #[tokio::test]
    async fn hanging_token_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let provider = HttpIdentityProvider::new(
            url.clone(),
            url,
            "client-123".to_string(),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            provider.exchange_code("code", "verifier", "https://home.example.com/cb"),
        )
        .await
        .expect("exchange must be bounded by the client timeout")
        .unwrap_err();
        assert!(matches!(err, ProviderError::Http(ref e) if e.is_timeout()));
    }
}
