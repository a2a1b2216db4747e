//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Pincerna - home-server control panel backend
#[derive(Parser, Debug)]
#[command(name = "pincerna")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PINCERNA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PINCERNA_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PINCERNA_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PINCERNA_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PINCERNA_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Mint a session token with the configured secret
    Token {
        /// Identity to embed
        #[arg(long)]
        email: String,

        /// Display name to embed
        #[arg(long)]
        name: Option<String>,

        /// Token lifetime (e.g. `30m`, `12h`); defaults to `auth.session_ttl`
        #[arg(long, value_parser = humantime::parse_duration)]
        ttl: Option<Duration>,
    },

    /// Show where a requested path resolves under the file root
    CheckPath {
        /// Requested path, as a client would send it
        path: String,
    },
}
