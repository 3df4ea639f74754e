//! # conduit
//!
//! Server binary: loads settings, opens the database, and serves chat,
//! project, tool-server, and terminal endpoints until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use conduit_server::{start, AppState, ServerConfig};
use conduit_settings::{load_settings, load_settings_from_path};
use conduit_store::Database;
use conduit_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Conduit chat and terminal server.
#[derive(Parser, Debug)]
#[command(name = "conduit", about = "Agent chat and terminal server")]
struct Cli {
    /// Settings file (defaults to ~/.conduit/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Default log level; RUST_LOG wins when set.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        format: if cli.pretty { LogFormat::Pretty } else { LogFormat::Json },
        ..Default::default()
    });

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let db_path = cli.db_path.unwrap_or_else(|| settings.database.path_buf());
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let config = ServerConfig::from_settings(&settings);
    let state = AppState::with_native_terminals(settings, db)
        .context("failed to load tool servers")?;
    let handle = start(config, state).await.context("failed to start server")?;
    tracing::info!(port = handle.port, "conduit ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
