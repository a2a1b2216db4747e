//! Router tests: public vs protected routes, error payloads, denial page

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

use pincerna::config::Config;
use pincerna::server::{AppState, create_router};
use pincerna::storage::{BackupManager, Mount, MountSource, StorageWatcher};

struct Fixture {
    _dir: tempfile::TempDir,
    state: Arc<AppState>,
    router: Router,
}

fn fixture(client_id: Option<&str>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir_all(root.join("Movies")).unwrap();

    let mut config = Config::default();
    config.auth.session_secret = Some("router-secret".to_string());
    config.auth.client_id = client_id.map(str::to_string);
    config.auth.state_dir = dir.path().join("state").to_string_lossy().into_owned();
    config.auth.turnstile_sitekey = Some("site-key".to_string());
    config.files.root = root.to_string_lossy().into_owned();

    let state = Arc::new(AppState::from_config(&config).unwrap());
    let router = create_router(Arc::clone(&state), Duration::from_secs(5));
    Fixture {
        _dir: dir,
        state,
        router,
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).header(header::HOST, "nas.local:5002");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn token(f: &Fixture) -> String {
    f.state
        .issuer
        .issue("admin@localhost", None, Duration::from_secs(600))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Health and config are public
#[tokio::test]
async fn test_public_routes() {
    let f = fixture(None);

    let response = f.router.clone().oneshot(get("/cloud/api/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = f.router.clone().oneshot(get("/cloud/api/config", None)).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["turnstile_sitekey"], "site-key");
    assert_eq!(body["oauth_enabled"], false);
}

/// Protected routes need a valid token
#[tokio::test]
async fn test_protected_routes_require_session() {
    let f = fixture(None);

    let response = f.router.clone().oneshot(get("/cloud/api/auth/me", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "missing_token");

    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/media/videos", Some("not-a-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "malformed_token");

    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/auth/me", Some(&token(&f))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["email"], "admin@localhost");
}

/// Expired tokens are reported as such
#[tokio::test]
async fn test_expired_token_is_rejected() {
    let f = fixture(None);
    let expired = f
        .state
        .issuer
        .issue_at("admin@localhost", None, Duration::from_secs(60), 1_000)
        .unwrap();

    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/auth/me", Some(&expired)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "expired_token");
}

/// The file resolver refuses traversal with a structured error
#[tokio::test]
async fn test_resolve_refuses_traversal() {
    let f = fixture(None);
    let t = token(&f);

    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/files/resolve?path=../../etc/passwd", Some(&t)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "outside_root");

    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/files/resolve?path=/Movies", Some(&t)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["relative"], "Movies");
    assert_eq!(body["exists"], true);
}

/// Serving thumbnails is lookup only
#[tokio::test]
async fn test_unknown_thumbnail_is_not_found() {
    let f = fixture(None);
    let hash = "0".repeat(64);

    let response = f
        .router
        .clone()
        .oneshot(get(&format!("/cloud/api/media/thumbnail/{hash}"), Some(&token(&f))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
}

/// Login without a client id is a configuration error
#[tokio::test]
async fn test_login_without_client_id() {
    let f = fixture(None);
    let response = f.router.clone().oneshot(get("/cloud/api/auth/login", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "missing_client_credentials");
}

/// Login redirects to the provider with a redirect URI built from the forwarded host
#[tokio::test]
async fn test_login_redirects_to_provider() {
    let f = fixture(Some("client-xyz"));
    let request = Request::builder()
        .uri("/cloud/api/auth/login")
        .header(header::HOST, "127.0.0.1:5002")
        .header("x-forwarded-host", "home.example.com")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();

    let response = f.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let url = url::Url::parse(location).unwrap();
    let redirect_uri = url
        .query_pairs()
        .find(|(k, _)| k == "redirect_uri")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(redirect_uri, "https://home.example.com/cloud/api/auth/callback");
}

/// A callback with an unknown state renders the denial page
#[tokio::test]
async fn test_callback_with_unknown_state_is_denied() {
    let f = fixture(Some("client-xyz"));
    let response = f
        .router
        .clone()
        .oneshot(get("/cloud/api/auth/callback?code=abc&state=never-issued", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("session_expired"));
}

/// Bootstrap login is disabled without a configured code
#[tokio::test]
async fn test_code_login_disabled_by_default() {
    let f = fixture(None);
    let request = Request::builder()
        .method("POST")
        .uri("/cloud/api/auth/code")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"email":"admin@localhost","code":"x"}"#))
        .unwrap();

    let response = f.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "code_login_disabled");
}

/// Turnstile passes when no secret is configured
#[tokio::test]
async fn test_turnstile_without_secret_succeeds() {
    let f = fixture(None);
    let request = Request::builder()
        .method("POST")
        .uri("/cloud/api/verify_turnstile")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"token":"widget"}"#))
        .unwrap();

    let response = f.router.clone().oneshot(request).await.unwrap();
    assert_eq!(json_body(response).await["success"], true);
}

/// Manual backup of something that is not a mounted volume is refused
#[tokio::test]
async fn test_manual_backup_of_unknown_mount() {
    let f = fixture(None);
    let request = Request::builder()
        .method("POST")
        .uri("/cloud/api/storage/backup")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, token(&f))
        .body(Body::from(r#"{"path":"/media/nothing"}"#))
        .unwrap();

    let response = f.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "unknown_mount");
}

/// Fixed mount table
struct FixedMounts(Vec<Mount>);

#[async_trait]
impl MountSource for FixedMounts {
    async fn mounts(&self) -> pincerna::Result<Vec<Mount>> {
        Ok(self.0.clone())
    }
}

/// The manual backup outlives the general request timeout
#[tokio::test]
async fn test_manual_backup_is_not_cut_by_request_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let usb = dir.path().join("media").join("usb1");
    for i in 0..2000 {
        let file = usb.join("Streaming").join(format!("d{}", i % 20)).join(format!("f{i}.txt"));
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, b"x").unwrap();
    }

    let mut config = Config::default();
    config.auth.session_secret = Some("router-secret".to_string());
    config.auth.state_dir = dir.path().join("state").to_string_lossy().into_owned();
    config.files.root = dir.path().join("root").to_string_lossy().into_owned();

    let mut state = AppState::from_config(&config).unwrap();
    let mounts = FixedMounts(vec![Mount {
        device: "/dev/sdb1".to_string(),
        mount_point: usb.clone(),
        fs_type: "ext4".to_string(),
    }]);
    state.storage = Arc::new(StorageWatcher::new(
        Arc::new(mounts),
        Arc::new(BackupManager::new(
            dir.path().join("root").join("Backups"),
            "Streaming",
            Duration::from_secs(60),
            5,
        )),
        false,
    ));
    state.storage.poll_once().await;

    let state = Arc::new(state);
    let router = create_router(Arc::clone(&state), Duration::from_millis(1));
    let token = state
        .issuer
        .issue("admin@localhost", None, Duration::from_secs(600))
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/cloud/api/storage/backup")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(serde_json::json!({ "path": usb }).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["backup"]["files"], 2000);
    assert_eq!(state.storage.backups().recent().len(), 1);
}
