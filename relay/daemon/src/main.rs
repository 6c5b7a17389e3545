//! Relay Daemon - HTTP Streaming Server
//!
//! Entry point for the relay daemon. Loads configuration, binds the HTTP
//! listener and serves the streaming endpoints until a signal arrives.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8080)
//! relay-daemon
//!
//! # Custom listen address
//! relay-daemon --bind 0.0.0.0:9000
//!
//! # With config file
//! relay-daemon --config /etc/relay/relay.toml
//!
//! # Tighter relay and a session deadline
//! relay-daemon --capacity 1 --deadline-ms 30000
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown. Live sessions are cancelled and
//!   the daemon waits up to the configured grace period for them to close.

mod server;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{load_config, load_config_from_path, ConfigOverrides, RelayConfig};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use server::RelayServer;

/// Relay Daemon - streams generated output over chunked HTTP
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on (env `RELAY_BIND` is read by the config loader)
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Relay capacity (tokens buffered between source and sink)
    #[arg(long, value_name = "N")]
    capacity: Option<usize>,

    /// Base delay between pipeline tokens in milliseconds
    #[arg(long, value_name = "MS")]
    token_delay_ms: Option<u64>,

    /// Per-session deadline in milliseconds (0 disables)
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind,
            relay_capacity: self.capacity,
            token_delay_ms: self.token_delay_ms,
            deadline_ms: self.deadline_ms,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Resolve the effective configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    Ok(config)
}

/// Install SIGTERM/SIGINT handlers and return a future that resolves on the first signal
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = resolve_config(&args)?;
    info!(
        bind = %config.server.bind,
        source = ?config.source(),
        capacity = config.stream.relay_capacity,
        grace_ms = u64::try_from(config.server.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    if let Some(path) = &config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let shutdown = shutdown_signal()?;
    let server = RelayServer::bind(&config).await?;

    match server.run(shutdown).await {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
