//! Gateway configuration (spec §6 "Config").
//!
//! Mirrors the teacher's two-layer config split: a `Default`-derived core
//! `GatewayConfig` here, loaded by the server binary from environment
//! variables with an optional YAML file underneath
//! (`apps/server/src/config.rs`'s `apply_env_overrides` pattern).

use serde::Deserialize;

use crate::protocol_constants::{DEFAULT_MAX_HISTORY_MESSAGES, DEFAULT_SESSION_TIMEOUT_MS};

/// Which STT adapter the bootstrap factory should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProviderKind {
    Streaming,
    Buffered,
}

impl Default for SttProviderKind {
    fn default() -> Self {
        Self::Streaming
    }
}

/// Core gateway configuration (spec §6). Every field corresponds to a
/// config key named in the spec; provider credentials are read as opaque
/// strings and never interpreted here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Selects the realtime voice core vs. a legacy handler. The realtime
    /// core is the only thing this crate implements; `false` is accepted
    /// for config-compatibility but the server refuses to start with it.
    pub enable_realtime: bool,

    pub stt_provider: SttProviderKind,
    pub stt_api_key: String,
    pub stt_model: String,
    pub stt_language: Option<String>,
    pub stt_endpoint_url: String,

    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_endpoint_url: String,
    pub llm_system_directive: String,
    pub llm_cost_per_1k_input_tokens: f64,
    pub llm_cost_per_1k_output_tokens: f64,

    pub tts_api_key: String,
    pub tts_voice_id: String,
    pub tts_model: String,
    pub tts_ws_url: String,
    pub tts_chunk_length_schedule: Vec<u32>,

    pub audio_chunk_size_ms: u32,
    pub max_silence_ms: u32,
    pub vad_threshold_bytes: usize,

    pub max_history_messages: usize,
    pub session_timeout_ms: u64,

    pub enable_metrics: bool,
    pub debug_audio: bool,
    pub log_level: String,

    /// Junk phrases the STT provider sometimes hallucinates on silence
    /// (e.g. "Thank you for watching"), filtered before a transcript is
    /// ever surfaced to the orchestrator.
    pub stt_junk_phrases: Vec<String>,

    /// Whether a reply interrupted by barge-in is appended to history as a
    /// (partial) assistant turn, rather than dropped. Defaults to `false`:
    /// the interrupted turn is discarded and never reaches the transcript.
    pub retain_interrupted_turns: bool,

    pub bind_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enable_realtime: true,
            stt_provider: SttProviderKind::default(),
            stt_api_key: String::new(),
            stt_model: "default".into(),
            stt_language: None,
            stt_endpoint_url: String::new(),
            llm_api_key: String::new(),
            llm_model: "default".into(),
            llm_endpoint_url: String::new(),
            llm_system_directive: "You are a helpful voice assistant. Keep replies brief.".into(),
            llm_cost_per_1k_input_tokens: 0.0,
            llm_cost_per_1k_output_tokens: 0.0,
            tts_api_key: String::new(),
            tts_voice_id: String::new(),
            tts_model: "default".into(),
            tts_ws_url: String::new(),
            tts_chunk_length_schedule: vec![120, 160, 250, 290],
            audio_chunk_size_ms: 20,
            max_silence_ms: 800,
            vad_threshold_bytes: 4_000,
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            enable_metrics: false,
            debug_audio: false,
            log_level: "info".into(),
            stt_junk_phrases: Vec::new(),
            retain_interrupted_turns: false,
            bind_port: 0,
        }
    }
}

impl GatewayConfig {
    /// Applies environment variable overrides (`VOICE_GATEWAY_*`). Called by
    /// the server binary after loading any YAML base (see
    /// `apps/server/src/config.rs::ServerConfig::load`); kept here rather
    /// than duplicated so the core crate and any future embedder share one
    /// override table.
    pub fn apply_env_overrides(&mut self) {
        macro_rules! override_string {
            ($env:literal, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }
        macro_rules! override_parsed {
            ($env:literal, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        override_parsed!("VOICE_GATEWAY_ENABLE_REALTIME", self.enable_realtime);
        override_string!("VOICE_GATEWAY_STT_API_KEY", self.stt_api_key);
        override_string!("VOICE_GATEWAY_STT_MODEL", self.stt_model);
        override_string!("VOICE_GATEWAY_STT_ENDPOINT_URL", self.stt_endpoint_url);
        if let Ok(val) = std::env::var("VOICE_GATEWAY_STT_LANGUAGE") {
            self.stt_language = Some(val);
        }
        if let Ok(val) = std::env::var("VOICE_GATEWAY_STT_PROVIDER") {
            self.stt_provider = match val.as_str() {
                "buffered" => SttProviderKind::Buffered,
                _ => SttProviderKind::Streaming,
            };
        }

        override_string!("VOICE_GATEWAY_LLM_API_KEY", self.llm_api_key);
        override_string!("VOICE_GATEWAY_LLM_MODEL", self.llm_model);
        override_string!("VOICE_GATEWAY_LLM_ENDPOINT_URL", self.llm_endpoint_url);

        override_string!("VOICE_GATEWAY_TTS_API_KEY", self.tts_api_key);
        override_string!("VOICE_GATEWAY_TTS_VOICE_ID", self.tts_voice_id);
        override_string!("VOICE_GATEWAY_TTS_MODEL", self.tts_model);
        override_string!("VOICE_GATEWAY_TTS_WS_URL", self.tts_ws_url);

        override_parsed!("VOICE_GATEWAY_AUDIO_CHUNK_SIZE_MS", self.audio_chunk_size_ms);
        override_parsed!("VOICE_GATEWAY_MAX_SILENCE_MS", self.max_silence_ms);
        override_parsed!("VOICE_GATEWAY_VAD_THRESHOLD_BYTES", self.vad_threshold_bytes);

        override_parsed!("VOICE_GATEWAY_MAX_HISTORY_MESSAGES", self.max_history_messages);
        override_parsed!("VOICE_GATEWAY_SESSION_TIMEOUT_MS", self.session_timeout_ms);

        override_parsed!("VOICE_GATEWAY_ENABLE_METRICS", self.enable_metrics);
        override_parsed!("VOICE_GATEWAY_DEBUG_AUDIO", self.debug_audio);
        override_string!("VOICE_GATEWAY_LOG_LEVEL", self.log_level);

        override_parsed!(
            "VOICE_GATEWAY_RETAIN_INTERRUPTED_TURNS",
            self.retain_interrupted_turns
        );
        override_parsed!("VOICE_GATEWAY_BIND_PORT", self.bind_port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_session_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_history_messages, 15);
        assert_eq!(config.session_timeout_ms, 1_800_000);
    }

    #[test]
    fn env_override_changes_log_level() {
        std::env::set_var("VOICE_GATEWAY_LOG_LEVEL", "debug");
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.log_level, "debug");
        std::env::remove_var("VOICE_GATEWAY_LOG_LEVEL");
    }
}
