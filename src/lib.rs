//! Pincerna
//!
//! Home-server control panel backend.
//!
//! # Components
//!
//! - **Credential Issuer**: short-lived HS256 session tokens ([`auth::token`])
//! - **PKCE Authenticator**: OAuth2 authorization code + PKCE login ([`auth::flow`])
//! - **Allow-List Gate**: case-insensitive email allow list ([`auth::allow_list`])
//! - **Sandboxed Path Resolver**: confines file access to one root ([`sandbox`])
//! - **Storage Watcher**: mount attach/detach and backup-on-attach ([`storage`])
//! - **Media Indexer** and **Thumbnail Cache** ([`media`])
//!
//! The two background loops publish snapshots; request handlers only read them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod sandbox;
pub mod server;
pub mod storage;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
