//! HTTP router and handlers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::ApiError;
use super::pages::{denial_page, message_page};
use super::session::require_session;
use crate::auth::{
    AllowList, BootstrapError, BootstrapLogin, CallbackParams, ClientSettings, CredentialIssuer,
    ExternalOrigin, HttpIdentityProvider, IdentityProvider, PendingFlowStore, PkceAuthenticator,
    SessionClaims, TurnstileVerifier,
};
use crate::config::Config;
use crate::error::{DeniedReason, PathError};
use crate::media::{FfmpegExtractor, MediaIndex, ThumbnailCache};
use crate::sandbox::PathResolver;
use crate::storage::{BackupError, BackupManager, ProcMounts, StorageWatcher};
use crate::Result;

/// Prefix every route is mounted under
pub const API_PREFIX: &str = "/cloud/api";

/// Shared application state
pub struct AppState {
    /// Session token issuer/verifier
    pub issuer: Arc<CredentialIssuer>,
    /// PKCE login driver
    pub authenticator: Arc<PkceAuthenticator>,
    /// Access-code login
    pub bootstrap: Arc<BootstrapLogin>,
    /// Turnstile check
    pub turnstile: Arc<TurnstileVerifier>,
    /// Site key exposed to the front end
    pub turnstile_sitekey: Option<String>,
    /// File root confinement
    pub resolver: Arc<PathResolver>,
    /// Video index
    pub media: Arc<MediaIndex>,
    /// Mount watcher and backup trigger
    pub storage: Arc<StorageWatcher>,
}

impl AppState {
    /// Wire every component from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let auth = &config.auth;
        let issuer = Arc::new(CredentialIssuer::from_config(auth));
        let allow_list = Arc::new(AllowList::new(
            auth.allow_list_path(),
            auth.default_identity.clone(),
        ));

        let provider = HttpIdentityProvider::from_config(auth)?
            .map(|p| Arc::new(p) as Arc<dyn IdentityProvider>);
        if provider.is_none() {
            warn!("auth.client_id is not set; identity provider login is disabled");
        }
        let pending = PendingFlowStore::new(auth.pending_flow_path(), auth.pending_flow_ttl)?;
        let authenticator = Arc::new(PkceAuthenticator::new(
            ClientSettings::from_config(auth),
            pending,
            provider,
            Arc::clone(&allow_list),
            Arc::clone(&issuer),
        ));

        let bootstrap = Arc::new(BootstrapLogin::from_config(
            auth,
            Arc::clone(&allow_list),
            Arc::clone(&issuer),
        ));

        let resolver = Arc::new(PathResolver::from_config(&config.files));

        let thumbnails = Arc::new(ThumbnailCache::new(
            config.media.thumbnail_dir(auth),
            Arc::new(FfmpegExtractor::from_config(&config.media)),
        )?);
        let media = Arc::new(MediaIndex::new(resolver.root().to_path_buf(), thumbnails));

        let backups = Arc::new(BackupManager::from_config(&config.storage, resolver.root()));
        let storage = Arc::new(StorageWatcher::new(
            Arc::new(ProcMounts::new(config.storage.enumerate_timeout)),
            backups,
            config.storage.auto_backup,
        ));

        Ok(Self {
            issuer,
            authenticator,
            bootstrap,
            turnstile: Arc::new(TurnstileVerifier::from_config(auth)?),
            turnstile_sitekey: auth.turnstile_sitekey.clone(),
            resolver,
            media,
            storage,
        })
    }
}

/// Create the router
///
/// Every route except the manual backup trigger is bounded by
/// `request_timeout`; the backup is bounded by its own copy timeout.
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(me_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/media/videos", get(videos_handler))
        .route("/media/thumbnail/{hash}", get(thumbnail_handler))
        .route("/storage/mounts", get(mounts_handler))
        .route("/storage/backups", get(backups_handler))
        .route("/files/resolve", get(resolve_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_session,
        ));

    let long_running = Router::new()
        .route("/storage/backup", post(backup_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_session,
        ));

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/code", post(code_login_handler))
        .route("/verify_turnstile", post(turnstile_handler))
        .merge(protected)
        .layer(TimeoutLayer::new(request_timeout))
        .merge(long_running);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "turnstile_sitekey": state.turnstile_sitekey,
        "oauth_enabled": state.authenticator.is_configured(),
        "code_login_enabled": state.bootstrap.is_enabled(),
    }))
}

/// 302 to `location`
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Some(origin) = ExternalOrigin::from_request(&headers, &uri) else {
        return ApiError::bad_request("Cannot determine request host").into_response();
    };

    match state.authenticator.start(&origin) {
        Ok(url) => found(&url),
        Err(e) => {
            warn!(error = %e, "Cannot start login");
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.kind(), e.to_string()).into_response()
        }
    }
}

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(origin) = ExternalOrigin::from_request(&headers, &uri) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(message_page("failed", "Cannot determine request host.")),
        )
            .into_response();
    };

    match state.authenticator.complete_callback(&params, &origin).await {
        Ok(success) => {
            let user = serde_json::to_string(&success.identity).unwrap_or_default();
            let fragment: String = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("token", &success.token)
                .append_pair("user", &user)
                .finish();
            found(&format!("/#{fragment}"))
        }
        Err(reason) => {
            let status = if reason == DeniedReason::NotAllowed {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::UNAUTHORIZED
            };
            (status, Html(denial_page(reason))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeLoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    code: String,
}

async fn code_login_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CodeLoginRequest>,
) -> Response {
    match state.bootstrap.login(&body.email, &body.code) {
        Ok(token) => Json(json!({
            "token": token,
            "user": { "email": body.email.trim().to_lowercase() },
        }))
        .into_response(),
        Err(e) => {
            let status = match e {
                BootstrapError::Disabled => StatusCode::NOT_FOUND,
                BootstrapError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                BootstrapError::InvalidCode => StatusCode::UNAUTHORIZED,
                BootstrapError::NotAllowed => StatusCode::FORBIDDEN,
            };
            ApiError::new(status, e.kind(), e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TurnstileRequest {
    #[serde(default)]
    token: String,
}

async fn turnstile_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TurnstileRequest>,
) -> impl IntoResponse {
    let remote_ip = headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    let success = state.turnstile.verify(&body.token, remote_ip).await;
    Json(json!({ "success": success }))
}

async fn me_handler(Extension(claims): Extension<SessionClaims>) -> impl IntoResponse {
    Json(json!({
        "email": claims.sub,
        "name": claims.name,
        "expires_at": claims.exp,
    }))
}

async fn logout_handler(Extension(claims): Extension<SessionClaims>) -> impl IntoResponse {
    info!(event = "logout", email = %claims.sub, "Session ended by client");
    Json(json!({ "ok": true }))
}

async fn videos_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "videos": state.media.videos() }))
}

async fn thumbnail_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Response {
    let key = hash.strip_suffix(".jpg").unwrap_or(&hash);
    let Some(path) = state.media.thumbnails().lookup(key) else {
        return ApiError::not_found("Thumbnail not found").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "private, max-age=86400"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read thumbnail");
            ApiError::not_found("Thumbnail not found").into_response()
        }
    }
}

async fn mounts_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "mounts": state.storage.current_mounts(),
        "backup_in_progress": state.storage.backups().is_busy(),
    }))
}

async fn backups_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "backups": state.storage.backups().recent() }))
}

#[derive(Debug, Deserialize)]
struct BackupRequest {
    path: PathBuf,
}

async fn backup_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(body): Json<BackupRequest>,
) -> Response {
    info!(mount_point = %body.path.display(), requested_by = %claims.sub, "Manual backup requested");
    match state.storage.trigger_backup(&body.path).await {
        Ok(record) => Json(json!({ "backup": record })).into_response(),
        Err(e) => {
            let status = match e {
                BackupError::UnknownMount(_) => StatusCode::NOT_FOUND,
                BackupError::MissingSource(_) => StatusCode::BAD_REQUEST,
                BackupError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                BackupError::Cancelled | BackupError::Io(_) | BackupError::Task(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            warn!(mount_point = %body.path.display(), error = %e, "Manual backup failed");
            ApiError::new(status, e.kind(), e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    #[serde(default)]
    path: String,
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    match state.resolver.try_resolve(&query.path) {
        Ok(absolute) => {
            let relative = state
                .resolver
                .relative(&absolute)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            Json(json!({
                "path": absolute,
                "relative": relative,
                "exists": absolute.exists(),
            }))
            .into_response()
        }
        Err(e @ PathError::OutsideRoot) => {
            ApiError::new(StatusCode::FORBIDDEN, e.kind(), e.to_string()).into_response()
        }
    }
}
