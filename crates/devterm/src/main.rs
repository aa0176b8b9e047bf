//! # devterm
//!
//! Terminal session backend for the devterm desktop tools.
//!
//! ## Overview
//!
//! The UI talks to this process over stdin/stdout, one JSON object per line:
//! - Session management (create, list, close)
//! - Input handling (write keystrokes, execute commands, change directory)
//! - Resize notifications
//! - Push events for terminal output and shell exit
//!
//! Logs go to stderr since stdout carries the protocol.
//!
//! ## Architecture
//!
//! This is Layer 3 - the binary that ties together:
//! - devterm-core: Core types and configuration
//! - devterm-pty: Shell resolution and pseudoterminals
//! - devterm-session: Session lifecycle

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devterm::messages::schemas;
use devterm::{serve, TerminalServer};
use devterm_core::ServerConfig;
use devterm_session::TerminalSessionManager;

/// How long runtime teardown waits for blocking tasks such as the stdin reader.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "devterm")]
#[command(about = "Terminal session backend speaking JSON lines on stdin/stdout")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the JSON Schemas of all protocol messages and exit
    #[arg(long)]
    schema: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.schema {
        println!("{}", serde_json::to_string_pretty(&schemas())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run(config));

    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    result
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("devterm v{} starting...", env!("CARGO_PKG_VERSION"));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let manager = Arc::new(TerminalSessionManager::from_server_config(
        &config,
        Arc::new(event_tx),
    ));
    let server = TerminalServer::new(manager);

    info!(
        "Serving on stdio (max_sessions={}, default size {}x{})",
        config.server.max_sessions, config.terminal.default_cols, config.terminal.default_rows
    );

    serve(
        server,
        event_rx,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await?;

    info!("devterm shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, shutting down..."),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM signal, shutting down...");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
