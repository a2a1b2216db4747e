//! PKCE Authenticator
//!
//! Drives the authorization-code-with-PKCE login:
//!
//! ```text
//! start     -> state + verifier persisted, browser sent to the provider
//! callback  -> state consumed -> provider error? -> code exchange
//!           -> audience -> verified email -> allow list -> session token
//! ```
//!
//! Every refusal carries a [`DeniedReason`]; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::allow_list::AllowList;
use super::origin::ExternalOrigin;
use super::pending::PendingFlowStore;
use super::pkce::{generate_pkce, generate_state};
use super::provider::IdentityProvider;
use super::token::CredentialIssuer;
use crate::config::AuthConfig;
use crate::error::{ConfigError, DeniedReason};

/// Provider callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Identity handed back to the caller after a successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityInfo {
    /// Lower-cased email
    pub email: String,
    /// Display name, when the provider supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Successful login outcome
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    /// Signed session token
    pub token: String,
    /// Who logged in
    pub identity: IdentityInfo,
}

/// Static client settings for the authorization request
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// OAuth client id; `None` disables the flow
    pub client_id: Option<String>,
    /// Provider authorization endpoint
    pub authorize_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Callback path on our origin
    pub callback_path: String,
    /// Lifetime of issued session tokens
    pub session_ttl: Duration,
}

impl ClientSettings {
    /// Extract the client settings from configuration
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            client_id: config.client_id.clone().filter(|id| !id.is_empty()),
            authorize_url: config.authorize_url.clone(),
            scopes: config.scopes.clone(),
            callback_path: config.callback_path.clone(),
            session_ttl: config.session_ttl,
        }
    }
}

/// Coordinates pending-flow state, the provider, the allow list and the issuer
pub struct PkceAuthenticator {
    settings: ClientSettings,
    pending: PendingFlowStore,
    provider: Option<Arc<dyn IdentityProvider>>,
    allow_list: Arc<AllowList>,
    issuer: Arc<CredentialIssuer>,
}

impl PkceAuthenticator {
    /// Create an authenticator. `provider` is `None` when no client id is configured.
    #[must_use]
    pub fn new(
        settings: ClientSettings,
        pending: PendingFlowStore,
        provider: Option<Arc<dyn IdentityProvider>>,
        allow_list: Arc<AllowList>,
        issuer: Arc<CredentialIssuer>,
    ) -> Self {
        Self {
            settings,
            pending,
            provider,
            allow_list,
            issuer,
        }
    }

    /// Whether a client id is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.settings.client_id.is_some() && self.provider.is_some()
    }

    /// Begin a login: persist a pending flow and return the provider URL
    pub fn start(&self, origin: &ExternalOrigin) -> Result<String, ConfigError> {
        let Some(client_id) = self.settings.client_id.as_deref() else {
            return Err(ConfigError::MissingClientCredentials);
        };

        let mut auth_url = Url::parse(&self.settings.authorize_url).map_err(|e| {
            warn!(error = %e, "Invalid authorization endpoint");
            ConfigError::InvalidAuthorizeUrl
        })?;

        let state = generate_state();
        let (verifier, challenge) = generate_pkce();

        self.pending.insert(&state, &verifier).map_err(|e| {
            warn!(error = %e, "Failed to persist pending authorization flow");
            ConfigError::StateDirUnwritable
        })?;

        let redirect_uri = origin.redirect_uri(&self.settings.callback_path);
        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", client_id);
            params.append_pair("redirect_uri", &redirect_uri);
            params.append_pair("state", &state);
            params.append_pair("code_challenge", &challenge);
            params.append_pair("code_challenge_method", "S256");
            params.append_pair("access_type", "online");
            params.append_pair("prompt", "select_account");
            if !self.settings.scopes.is_empty() {
                params.append_pair("scope", &self.settings.scopes.join(" "));
            }
        }

        debug!(redirect_uri = %redirect_uri, "Starting PKCE login");
        Ok(auth_url.to_string())
    }

    /// Finish a login from the provider callback
    pub async fn complete_callback(
        &self,
        params: &CallbackParams,
        origin: &ExternalOrigin,
    ) -> Result<LoginSuccess, DeniedReason> {
        let outcome = self.run_callback(params, origin).await;
        match &outcome {
            Ok(success) => info!(
                event = "login.issued",
                method = "oauth",
                email = %success.identity.email,
                "Session token issued"
            ),
            Err(reason) => warn!(
                event = "login.denied",
                method = "oauth",
                reason = reason.kind(),
                "Login denied"
            ),
        }
        outcome
    }

    async fn run_callback(
        &self,
        params: &CallbackParams,
        origin: &ExternalOrigin,
    ) -> Result<LoginSuccess, DeniedReason> {
        let state = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(DeniedReason::SessionExpired)?;

        let flow = match self.pending.take(state) {
            Ok(Some(flow)) => flow,
            Ok(None) => return Err(DeniedReason::SessionExpired),
            Err(e) => {
                warn!(error = %e, "Pending flow store unavailable");
                return Err(DeniedReason::Failed);
            }
        };

        if let Some(ref error) = params.error {
            debug!(error = %error, description = ?params.error_description, "Provider reported an error");
            return Err(if error == "access_denied" {
                DeniedReason::Cancelled
            } else {
                DeniedReason::Failed
            });
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(DeniedReason::Failed)?;

        let (Some(client_id), Some(provider)) = (self.settings.client_id.as_deref(), self.provider.as_ref())
        else {
            return Err(DeniedReason::Failed);
        };

        let redirect_uri = origin.redirect_uri(&self.settings.callback_path);

        let tokens = provider
            .exchange_code(code, &flow.verifier, &redirect_uri)
            .await
            .map_err(|e| {
                warn!(error = %e, "Code exchange failed");
                DeniedReason::Failed
            })?;

        let id_token = tokens.id_token.as_deref().ok_or(DeniedReason::Failed)?;

        let claims = provider.introspect(id_token).await.map_err(|e| {
            warn!(error = %e, "ID token introspection failed");
            DeniedReason::Failed
        })?;

        if claims.aud != client_id {
            return Err(DeniedReason::AudienceMismatch);
        }

        let email = claims
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty() && claims.email_verified)
            .ok_or(DeniedReason::EmailUnverified)?;

        if !self.allow_list.is_allowed(&email) {
            return Err(DeniedReason::NotAllowed);
        }

        let name = claims.name.clone().filter(|n| !n.is_empty());
        let token = self
            .issuer
            .issue(&email, name.as_deref(), self.settings.session_ttl)
            .map_err(|e| {
                warn!(error = %e, "Failed to issue session token");
                DeniedReason::Failed
            })?;

        Ok(LoginSuccess {
            token,
            identity: IdentityInfo { email, name },
        })
    }
}
