//! Configuration management

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Signing secret used when none is configured. Deployments must override it.
pub const FALLBACK_SESSION_SECRET: &str = "change-me";

/// Identity admitted when the allow-list file cannot be loaded
pub const DEFAULT_IDENTITY: &str = "admin@localhost";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// File tree configuration
    pub files: FilesConfig,
    /// Storage watcher configuration
    pub storage: StorageConfig,
    /// Media indexer configuration
    pub media: MediaConfig,
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PINCERNA_ prefix)
        figment = figment.merge(Env::prefixed("PINCERNA_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            if expanded.exists() {
                match dotenvy::from_path(&expanded) {
                    Ok(()) => tracing::info!("Loaded env file: {}", expanded.display()),
                    Err(e) => tracing::warn!("Failed to load env file {}: {e}", expanded.display()),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {}", expanded.display());
            }
        }
    }
}

/// Expand a leading `~` to the home directory
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5002,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for session tokens (`env:VAR` supported)
    pub session_secret: Option<String>,
    /// Lifetime of tokens issued through the identity provider
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Lifetime of tokens issued through the bootstrap code login
    #[serde(with = "humantime_serde")]
    pub bootstrap_ttl: Duration,
    /// OAuth client id
    pub client_id: Option<String>,
    /// OAuth client secret (`env:VAR` supported)
    pub client_secret: Option<String>,
    /// Provider authorization endpoint
    pub authorize_url: String,
    /// Provider token endpoint
    pub token_url: String,
    /// Provider token introspection endpoint
    pub tokeninfo_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Path the provider redirects back to
    pub callback_path: String,
    /// Lifetime of a pending authorization flow
    #[serde(with = "humantime_serde")]
    pub pending_flow_ttl: Duration,
    /// Timeout for every call to the identity provider
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Directory for side files (pending flows, allow list, thumbnails)
    pub state_dir: String,
    /// Allow-list file; defaults to `<state_dir>/allowed_emails.json`
    pub allow_list_file: Option<String>,
    /// Identity admitted when the allow list cannot be loaded
    pub default_identity: String,
    /// Access code for the bootstrap admin login (`env:VAR` supported)
    pub bootstrap_code: Option<String>,
    /// Cloudflare Turnstile site key exposed to the front end
    pub turnstile_sitekey: Option<String>,
    /// Cloudflare Turnstile secret (`env:VAR` supported)
    pub turnstile_secret: Option<String>,
    /// Turnstile verification endpoint
    pub turnstile_verify_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            session_ttl: Duration::from_secs(12 * 3600),
            bootstrap_ttl: Duration::from_secs(30 * 60),
            client_id: None,
            client_secret: None,
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string(), "profile".to_string()],
            callback_path: "/cloud/api/auth/callback".to_string(),
            pending_flow_ttl: Duration::from_secs(600),
            provider_timeout: Duration::from_secs(10),
            state_dir: "~/.pincerna".to_string(),
            allow_list_file: None,
            default_identity: DEFAULT_IDENTITY.to_string(),
            bootstrap_code: None,
            turnstile_sitekey: None,
            turnstile_secret: None,
            turnstile_verify_url: "https://challenges.cloudflare.com/turnstile/v0/siteverify"
                .to_string(),
        }
    }
}

impl AuthConfig {
    /// Resolved state directory
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.state_dir)
    }

    /// Resolved allow-list file
    #[must_use]
    pub fn allow_list_path(&self) -> PathBuf {
        self.allow_list_file
            .as_deref()
            .map_or_else(|| self.state_dir().join("allowed_emails.json"), expand_home)
    }

    /// Pending-flow side file
    #[must_use]
    pub fn pending_flow_path(&self) -> PathBuf {
        self.state_dir().join("oauth_state.json")
    }

    /// Resolve the session secret, falling back to [`FALLBACK_SESSION_SECRET`].
    ///
    /// The fallback keeps verification enabled; the caller logs it as a
    /// deployment defect.
    #[must_use]
    pub fn resolve_session_secret(&self) -> (String, bool) {
        match self.session_secret.as_deref().and_then(resolve_secret) {
            Some(secret) if !secret.is_empty() => (secret, false),
            _ => (FALLBACK_SESSION_SECRET.to_string(), true),
        }
    }

    /// Resolve the OAuth client secret
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_deref().and_then(resolve_secret)
    }

    /// Resolve the bootstrap access code
    #[must_use]
    pub fn resolve_bootstrap_code(&self) -> Option<String> {
        self.bootstrap_code
            .as_deref()
            .and_then(resolve_secret)
            .filter(|c| !c.is_empty())
    }

    /// Resolve the Turnstile secret
    #[must_use]
    pub fn resolve_turnstile_secret(&self) -> Option<String> {
        self.turnstile_secret
            .as_deref()
            .and_then(resolve_secret)
            .filter(|s| !s.is_empty())
    }
}

/// Resolve a literal value or an `env:VAR_NAME` reference
fn resolve_secret(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        std::env::var(var_name).ok()
    } else {
        Some(value.to_string())
    }
}

/// File tree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Root every file operation is confined to
    pub root: String,
    /// Also reject paths whose real location (symlinks resolved) leaves the root
    pub check_symlinks: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: "/srv/pincerna".to_string(),
            check_symlinks: true,
        }
    }
}

impl FilesConfig {
    /// Resolved root directory
    #[must_use]
    pub fn root(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Storage watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Run the storage watcher loop
    pub enabled: bool,
    /// Poll period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Copy the backup subdirectory when a volume is attached
    pub auto_backup: bool,
    /// Well-known subdirectory copied from attached volumes
    pub backup_subdir: String,
    /// Backup destination, relative to the file root
    pub backup_dir: String,
    /// Number of recent backup records kept
    pub recent_limit: usize,
    /// Upper bound on a single backup copy
    #[serde(with = "humantime_serde")]
    pub copy_timeout: Duration,
    /// Upper bound on mount enumeration
    #[serde(with = "humantime_serde")]
    pub enumerate_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(15),
            auto_backup: false,
            backup_subdir: "Streaming".to_string(),
            backup_dir: "Backups".to_string(),
            recent_limit: 20,
            copy_timeout: Duration::from_secs(30 * 60),
            enumerate_timeout: Duration::from_secs(5),
        }
    }
}

/// Media indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Run the media indexer loop
    pub enabled: bool,
    /// Poll period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Thumbnail cache directory; defaults to `<state_dir>/thumbnails`
    pub thumbnail_dir: Option<String>,
    /// Frame extraction binary
    pub ffmpeg: String,
    /// Offset into the video the frame is taken from
    pub seek_seconds: u32,
    /// JPEG quality passed to the extractor (2 = best, 31 = worst)
    pub quality: u8,
    /// Upper bound on one frame extraction
    #[serde(with = "humantime_serde")]
    pub extract_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(30),
            thumbnail_dir: None,
            ffmpeg: "ffmpeg".to_string(),
            seek_seconds: 3,
            quality: 5,
            extract_timeout: Duration::from_secs(20),
        }
    }
}

impl MediaConfig {
    /// Resolved thumbnail directory
    #[must_use]
    pub fn thumbnail_dir(&self, auth: &AuthConfig) -> PathBuf {
        self.thumbnail_dir
            .as_deref()
            .map_or_else(|| auth.state_dir().join("thumbnails"), expand_home)
    }
}
