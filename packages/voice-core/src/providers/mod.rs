//! Provider abstraction: STT, LLM, and TTS capability contracts.
//!
//! Three orthogonal traits, each over a session identifier, grounded on
//! `sonos::traits`'s one-trait-per-capability split. Event delivery is
//! modeled as bounded `tokio::mpsc` channels returned from `connect` rather
//! than registered callbacks (spec §9: "callback-wired providers → contract
//! + explicit channels") — each event kind has exactly one channel and
//! therefore exactly one consumer, which is the single-sink invariant the
//! spec calls out as historically violated by ambiguous callback naming.

mod junk_phrases;
mod llm;
mod stt_buffered;
mod stt_streaming;
mod tts;

pub use junk_phrases::JunkPhraseFilter;
pub use llm::{HttpLlmProvider, LlmConfig};
pub use stt_buffered::{BufferedSttConfig, BufferedSttProvider};
pub use stt_streaming::{StreamingSttConfig, StreamingSttProvider};
pub use tts::{TtsConfig, WsTtsProvider};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderResult;
use crate::session::{SessionId, Turn};

/// Static description of a provider, surfaced in the `ready` event and on
/// the `/info` HTTP endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub model: String,
    pub language: Option<String>,
    pub typical_latency_ms: u32,
}

/// One transcript update from the STT provider.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// Channels returned by `SttProvider::connect`. The orchestrator is the
/// single consumer of both; nothing else may read from them.
pub struct SttEvents {
    pub transcripts: mpsc::Receiver<TranscriptEvent>,
    pub errors: mpsc::Receiver<ProviderError>,
}

/// Channels returned by `TtsProvider::connect`.
pub struct TtsEvents {
    pub audio: mpsc::Receiver<bytes::Bytes>,
    pub complete: mpsc::Receiver<()>,
    pub errors: mpsc::Receiver<ProviderError>,
}

/// Channels returned by `LlmProvider::stream_response`. A mid-stream
/// upstream failure is delivered on `errors`, distinct from the clean
/// end-of-stream signalled by `fragments` closing on its own — the two
/// must never be conflated (spec §8 scenario 6: a stream error emits
/// `llm_error` and the partial reply is discarded, not appended).
pub struct LlmEvents {
    pub fragments: mpsc::Receiver<String>,
    pub errors: mpsc::Receiver<ProviderError>,
}

pub use crate::error::ProviderError;

/// Speech-to-text capability contract (spec §4.1 "STT contract").
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Establishes upstream resources for `session_id`. Idempotent only in
    /// the sense that calling it twice on an already-connected adapter is
    /// an error (`ProviderError::AlreadyConnected`), not a silent no-op.
    async fn connect(&self, session_id: SessionId) -> ProviderResult<SttEvents>;

    /// Forwards one opaque audio frame from the client. Must never block on
    /// upstream I/O for longer than the client's frame interval (spec §5
    /// "Suspension points").
    async fn send_audio(&self, bytes: bytes::Bytes) -> ProviderResult<()>;

    fn is_connected(&self) -> bool;

    fn info(&self) -> ProviderInfo;

    /// Flushes in-flight work and releases resources. Idempotent.
    async fn disconnect(&self);
}

/// Large-language-model capability contract (spec §4.3 "LLM contract").
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Streams an assistant reply for the given history. Single-consumer,
    /// finite, non-restartable; the caller may abandon consumption at any
    /// point, which propagates cancellation upstream (spec §9: "lazy finite
    /// sequence of text" over a cancellation token).
    async fn stream_response(
        &self,
        history: Vec<Turn>,
        client_name: Option<String>,
        cancel: CancellationToken,
    ) -> ProviderResult<LlmEvents>;

    /// Instructs the underlying upstream request to abort. Safe to call
    /// when no stream is active. MUST NOT block (spec §5).
    fn cancel(&self);

    fn info(&self) -> ProviderInfo;

    /// Rough cost estimate in USD for a prospective call, used only for
    /// observability; never load-bearing for correctness.
    fn estimate_cost(&self, messages: &[Turn]) -> f64;
}

/// Text-to-speech capability contract (spec §4.4 "TTS contract").
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn connect(&self, session_id: SessionId, voice_id: Option<String>) -> ProviderResult<TtsEvents>;

    /// Submits text; `flush=true` means "end of a semantic unit, emit the
    /// audio now". Multiple non-flush calls may be coalesced upstream.
    async fn synthesize(&self, text: &str, flush: bool) -> ProviderResult<()>;

    /// Drops all pending and in-flight synthesis for this session WITHOUT
    /// closing the provider connection. MUST NOT block. See module docs on
    /// `WsTtsProvider` for the cancelled-flag mechanism that makes this
    /// safe (spec §9, critical barge-in invariant).
    fn cancel(&self);

    /// Sends an end-of-stream sentinel upstream and closes the connection.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn info(&self) -> ProviderInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_info_serializes_with_camel_friendly_fields() {
        let info = ProviderInfo {
            name: "test",
            model: "model-x".into(),
            language: Some("es".into()),
            typical_latency_ms: 200,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("typical_latency_ms"));
    }
}
