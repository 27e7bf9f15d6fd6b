//! HTTP route handlers.
//!
//! Thin handlers delegating to `AppState`; the only non-WebSocket surface
//! this gateway exposes (spec §6 "HTTP").

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::api::AppState;
use crate::protocol_constants::{SERVICE_ID, WS_ROUTE};
use crate::wire::ws_handler;

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(info))
        .route(WS_ROUTE, get(ws_handler))
        .with_state(state)
}

/// Liveness probe: "Is the process running?" Always 200 if responding.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}

/// Reports active session count and the configured provider models, for
/// operators and smoke tests rather than clients.
async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_ID,
        "activeSessions": state.registry.len(),
        "sttProvider": format!("{:?}", state.config.stt_provider),
        "llmModel": state.config.llm_model,
        "ttsModel": state.config.tts_model,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bootstrap_services;
    use crate::config::GatewayConfig;
    use crate::session::SessionId;
    use std::sync::Arc;

    struct NoopTeardown;

    #[async_trait::async_trait]
    impl crate::session::SessionTeardown for NoopTeardown {
        async fn teardown(&self, _session_id: SessionId) {}
    }

    #[tokio::test]
    async fn health_check_reports_ok_status() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn info_reports_zero_sessions_for_a_fresh_registry() {
        let services = bootstrap_services(GatewayConfig::default(), Arc::new(NoopTeardown));
        let state = AppState::from_services(&services);
        let response = info(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
