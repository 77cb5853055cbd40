//! VCF bot server - pairing, status and outbound messaging over HTTP.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use vcfbot_server::{build_router, config, logging, state};

use config::Config;
use logging::{LogConfig, LogFormat};
use state::AppState;

/// VCF bot server - chat bot sessions behind a small HTTP API.
#[derive(Parser, Debug)]
#[command(name = "vcfbot-server")]
#[command(about = "HTTP server for VCF bot chat sessions")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config and environment
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for every target)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (includes bridge traffic)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "bridge=debug").
    /// Can be specified multiple times. Targets are prefixed with "vcfbot::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(target: "vcfbot::startup", "Loaded configuration (port: {})", config.port);

    let state = Arc::new(AppState::new(config.clone())?);
    tracing::info!(
        target: "vcfbot::startup",
        "Settings store at {}, commands: {}",
        state.settings.path().display(),
        state.session_manager.dispatcher().names().join(", ")
    );

    spawn_default_session(state.clone());

    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "vcfbot::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(target: "vcfbot::startup", "Server stopped, ending sessions");
    state.session_manager.shutdown().await;

    Ok(())
}

/// Start the configured boot session without blocking startup.
fn spawn_default_session(state: Arc<AppState>) {
    let Some(session_id) = state.config.default_session.clone() else {
        tracing::info!(target: "vcfbot::startup", "No default session configured, waiting for pairing requests");
        return;
    };
    tokio::spawn(async move {
        match state.session_manager.create(&session_id).await {
            Ok(_) => {
                tracing::info!(target: "vcfbot::startup", "Default session {} starting", session_id);
            }
            Err(e) => {
                tracing::warn!(target: "vcfbot::startup", "Default session {} failed to start: {}", session_id, e);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "vcfbot::startup", "Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "vcfbot::startup", "Shutdown requested");
}
