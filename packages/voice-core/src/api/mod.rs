//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the session registry and provider
//! factory; router construction and server startup live here, grounded on
//! the teacher's `api/mod.rs`.

pub mod http;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{BootstrappedServices, ProviderFactory};
use crate::config::GatewayConfig;
use crate::runtime::TokioSpawner;
use crate::session::SessionRegistry;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    #[error("no available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub providers: Arc<dyn ProviderFactory>,
    pub spawner: TokioSpawner,
    pub config: Arc<GatewayConfig>,
    pub cancel_token: CancellationToken,
}

impl AppState {
    pub fn from_services(services: &BootstrappedServices) -> Self {
        Self {
            registry: Arc::clone(&services.registry),
            providers: Arc::clone(&services.providers),
            spawner: services.spawner.clone(),
            config: Arc::clone(&services.config),
            cancel_token: services.cancel_token.clone(),
        }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.bind_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(8100, 8110).await?
    };

    log::info!("[Server] listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
