//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where the session registry, the
//! per-session provider factory, and the task spawner are instantiated and
//! wired together.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, SttProviderKind};
use crate::providers::{
    BufferedSttConfig, HttpLlmProvider, LlmConfig, LlmProvider, StreamingSttConfig, SttProvider,
    TtsConfig, TtsProvider,
};
use crate::protocol_constants::SESSION_REAPER_INTERVAL_SECS;
use crate::runtime::TokioSpawner;
use crate::session::{SessionRegistry, SessionTeardown};

/// Builds a fresh set of providers for one session. Providers are
/// stateful (a connect/disconnect lifecycle per session) so a new instance
/// is constructed per connection rather than shared across sessions.
pub trait ProviderFactory: Send + Sync {
    fn build_stt(&self) -> Arc<dyn SttProvider>;
    fn build_llm(&self) -> Arc<dyn LlmProvider>;
    fn build_tts(&self) -> Arc<dyn TtsProvider>;
}

/// Constructs providers straight from a [`GatewayConfig`], selecting the
/// streaming or buffered STT adapter by `stt_provider` (spec §6) so the
/// orchestrator and wire edge never match on config directly.
pub struct ConfiguredProviderFactory {
    config: Arc<GatewayConfig>,
}

impl ConfiguredProviderFactory {
    pub fn new(config: Arc<GatewayConfig>) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

impl ProviderFactory for ConfiguredProviderFactory {
    fn build_stt(&self) -> Arc<dyn SttProvider> {
        match self.config.stt_provider {
            SttProviderKind::Streaming => Arc::new(crate::providers::StreamingSttProvider::new(
                StreamingSttConfig {
                    ws_url: self.config.stt_endpoint_url.clone(),
                    api_key: self.config.stt_api_key.clone(),
                    model: self.config.stt_model.clone(),
                    language: self.config.stt_language.clone(),
                    junk_phrases: self.config.stt_junk_phrases.clone(),
                },
            )),
            SttProviderKind::Buffered => {
                Arc::new(crate::providers::BufferedSttProvider::new(BufferedSttConfig {
                    endpoint_url: self.config.stt_endpoint_url.clone(),
                    api_key: self.config.stt_api_key.clone(),
                    model: self.config.stt_model.clone(),
                    language: self.config.stt_language.clone(),
                    junk_phrases: self.config.stt_junk_phrases.clone(),
                }))
            }
        }
    }

    fn build_llm(&self) -> Arc<dyn LlmProvider> {
        Arc::new(HttpLlmProvider::new(LlmConfig {
            endpoint_url: self.config.llm_endpoint_url.clone(),
            api_key: self.config.llm_api_key.clone(),
            model: self.config.llm_model.clone(),
            system_directive: self.config.llm_system_directive.clone(),
            cost_per_1k_input_tokens: self.config.llm_cost_per_1k_input_tokens,
            cost_per_1k_output_tokens: self.config.llm_cost_per_1k_output_tokens,
        }))
    }

    fn build_tts(&self) -> Arc<dyn TtsProvider> {
        Arc::new(crate::providers::WsTtsProvider::new(TtsConfig {
            ws_url: self.config.tts_ws_url.clone(),
            api_key: self.config.tts_api_key.clone(),
            model: self.config.tts_model.clone(),
            voice_id: self.config.tts_voice_id.clone(),
            chunk_length_schedule: self.config.tts_chunk_length_schedule.clone(),
        }))
    }
}

/// Container for all bootstrapped services, consumed by `AppState`.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub registry: Arc<SessionRegistry>,
    pub providers: Arc<dyn ProviderFactory>,
    pub spawner: TokioSpawner,
    pub config: Arc<GatewayConfig>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: stops the reaper and signals every
    /// background task sharing `cancel_token` to stop.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown");
        self.registry.shutdown();
        self.cancel_token.cancel();
        log::info!("[Bootstrap] shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies. The
/// composition root: wiring order is registry, then provider factory
/// (depends on config only), then the reaper (depends on both).
///
/// # Arguments
/// * `config` - Application configuration.
/// * `teardown` - Session teardown hook, implemented by the caller's
///   per-session orchestrator registry (the wire edge owns orchestrators,
///   so it also owns tearing them down).
pub fn bootstrap_services(
    config: GatewayConfig,
    teardown: Arc<dyn SessionTeardown>,
) -> BootstrappedServices {
    let config = Arc::new(config);
    let spawner = TokioSpawner::current();
    let registry = SessionRegistry::new();
    let providers = ConfiguredProviderFactory::new(Arc::clone(&config));
    let cancel_token = CancellationToken::new();

    registry.spawn_reaper(
        &spawner,
        teardown,
        Duration::from_secs(SESSION_REAPER_INTERVAL_SECS),
        config.session_timeout_ms,
    );

    BootstrappedServices {
        registry,
        providers,
        spawner,
        config,
        cancel_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_a_usable_registry() {
        let config = GatewayConfig::default();
        struct NoopTeardown;
        #[async_trait::async_trait]
        impl SessionTeardown for NoopTeardown {
            async fn teardown(&self, _session_id: crate::session::SessionId) {}
        }
        let services = bootstrap_services(config, Arc::new(NoopTeardown));
        assert!(services.registry.is_empty());
        services.shutdown().await;
    }
}
