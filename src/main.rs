//! Pincerna - home-server control panel backend

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use pincerna::{
    auth::CredentialIssuer,
    cli::{Cli, Command},
    config::Config,
    sandbox::PathResolver,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Some(Command::Token { email, name, ttl }) => run_token(&config, &email, name.as_deref(), ttl),
        Some(Command::CheckPath { path }) => {
            run_check_path(&config, &path);
            Ok(())
        }
        Some(Command::Serve) | None => run_server(config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Print a session token for operator bootstrap
fn run_token(config: &Config, email: &str, name: Option<&str>, ttl: Option<Duration>) -> anyhow::Result<()> {
    let issuer = CredentialIssuer::from_config(&config.auth);
    let ttl = ttl.unwrap_or(config.auth.session_ttl);
    let token = issuer
        .issue(&email.trim().to_lowercase(), name, ttl)
        .context("issuing session token")?;
    info!(event = "login.issued", method = "cli", email = %email, ttl = ?ttl, "Session token issued");
    println!("{token}");
    Ok(())
}

fn run_check_path(config: &Config, path: &str) {
    let resolver = PathResolver::from_config(&config.files);
    match resolver.try_resolve(path) {
        Ok(resolved) => println!("{}", resolved.display()),
        Err(e) => println!("refused: {e}"),
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        root = %config.files.root,
        "Starting pincerna"
    );

    let server = Server::new(config).context("initializing server")?;
    server.run().await.context("server error")?;
    Ok(())
}
