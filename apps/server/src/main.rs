//! Voice Gateway Server - standalone headless server for the realtime
//! voice-agent gateway.
//!
//! Parses CLI/env configuration, bootstraps the core library's services,
//! and serves the client-facing HTTP/WebSocket surface until a shutdown
//! signal arrives.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use voice_core::session::SessionId;
use voice_core::{bootstrap_services, AppState, GatewayError};

use crate::config::ServerConfig;

/// Voice Gateway Server - headless browser-to-provider realtime voice gateway.
#[derive(Parser, Debug)]
#[command(name = "voice-gateway-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VOICE_GATEWAY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "VOICE_GATEWAY_BIND_PORT")]
    port: Option<u16>,
}

/// No sessions are bound to anything outside the registry on this binary,
/// so teardown is a no-op hook for the reaper; the orchestrator that owns
/// each session's providers already tears itself down on socket close (see
/// `voice_core::wire::ws`).
struct NoopTeardown;

#[async_trait::async_trait]
impl voice_core::session::SessionTeardown for NoopTeardown {
    async fn teardown(&self, session_id: SessionId) {
        log::info!("[Server] reaper evicting idle session {}", session_id);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Voice Gateway Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.gateway.bind_port = port;
    }

    if !config.gateway.enable_realtime {
        return Err(GatewayError::Internal(
            "enable_realtime=false selects a legacy handler this binary does not implement".into(),
        )
        .into());
    }

    let services = bootstrap_services(config.gateway, Arc::new(NoopTeardown));
    log::info!("Services bootstrapped successfully");

    let app_state = AppState::from_services(&services);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = voice_core::api::start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
