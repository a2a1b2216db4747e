//! Server lifecycle: bind, start the background loops, serve, shut down

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{API_PREFIX, AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// Control panel server
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server from configuration
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Shared state (for embedding and tests)
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let mut loops = Vec::new();
        if self.config.storage.enabled {
            loops.push(
                Arc::clone(&self.state.storage)
                    .spawn(self.config.storage.poll_interval, shutdown_tx.subscribe()),
            );
        } else {
            info!("Storage watcher disabled");
        }
        if self.config.media.enabled {
            loops.push(
                Arc::clone(&self.state.media)
                    .spawn(self.config.media.poll_interval, shutdown_tx.subscribe()),
            );
        } else {
            info!("Media indexer disabled");
        }

        let app = create_router(Arc::clone(&self.state), self.config.server.request_timeout);
        let listener = TcpListener::bind(addr).await?;

        info!(version = env!("CARGO_PKG_VERSION"), "pincerna starting");
        info!(host = %self.config.server.host, port = self.config.server.port, prefix = API_PREFIX, "Listening");
        info!(root = %self.state.resolver.root().display(), "File root");
        info!(
            oauth = self.state.authenticator.is_configured(),
            code_login = self.state.bootstrap.is_enabled(),
            turnstile = self.state.turnstile.is_enabled(),
            "Login methods"
        );
        if self.config.storage.auto_backup {
            info!(subdir = %self.config.storage.backup_subdir, "Auto-backup on attach enabled");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Wait for Ctrl-C or SIGTERM, then tell the background loops to stop
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
