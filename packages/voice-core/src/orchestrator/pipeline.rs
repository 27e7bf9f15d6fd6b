//! The session orchestrator: one instance per client connection, wiring the
//! client socket to STT, LLM, and TTS (spec §4.5).
//!
//! The orchestrator owns the session's providers and serializes its own
//! state transitions behind `Session::state`/`pending_reply`; callers on the
//! wire edge only need to forward inbound frames and let this type do the
//! rest. Provider events (transcripts, audio chunks, completions, errors)
//! are delivered over the bounded channels `connect()` returns and consumed
//! by background tasks spawned from `init()`, which funnel everything back
//! through `self` via `Arc<Orchestrator>` so there is exactly one place that
//! mutates session state.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult, ProviderError};
use crate::protocol_constants::SENTENCE_DELIMITERS;
use crate::providers::{LlmEvents, LlmProvider, ProviderInfo, SttProvider, TtsProvider};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::{Role, Session};
use crate::wire::{EventKind, ServerFrame, WireErrorKind};

/// Outbound half of the client socket. Implemented by the wire edge and
/// handed to the orchestrator at construction, so the orchestrator never
/// touches axum types directly.
#[async_trait::async_trait]
pub trait ClientSink: Send + Sync {
    async fn send_frame(&self, frame: ServerFrame);
    async fn send_binary(&self, bytes: Bytes);
}

pub struct Orchestrator {
    pub(crate) session: Arc<Session>,
    pub(crate) stt: Arc<dyn SttProvider>,
    pub(crate) llm: Arc<dyn LlmProvider>,
    pub(crate) tts: Arc<dyn TtsProvider>,
    sink: Arc<dyn ClientSink>,
    spawner: TokioSpawner,
    /// Accumulated text of the in-flight assistant reply. `None` means no
    /// reply is currently eligible for a history append — either nothing is
    /// in flight, or barge-in cleared it out from under the reply loop.
    pub(crate) pending_reply: Mutex<Option<String>>,
    /// Whether barge-in appends the interrupted reply to history instead of
    /// discarding it (spec §6 `retain_interrupted_turns`, default `false`).
    pub(crate) retain_interrupted_turns: bool,
}

impl Orchestrator {
    pub fn new(
        session: Arc<Session>,
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        sink: Arc<dyn ClientSink>,
        spawner: TokioSpawner,
        retain_interrupted_turns: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            stt,
            llm,
            tts,
            sink,
            spawner,
            pending_reply: Mutex::new(None),
            retain_interrupted_turns,
        })
    }

    pub fn session_id(&self) -> crate::session::SessionId {
        self.session.id
    }

    pub(crate) async fn send_event(&self, event: EventKind, data: serde_json::Value) {
        self.sink.send_frame(ServerFrame::event(event, data)).await;
    }

    async fn send_error(&self, error: WireErrorKind, message: impl Into<String>) {
        self.sink.send_frame(ServerFrame::error(error, message)).await;
    }

    /// Runs initialization (spec §4.5 "Initialization"): connects STT and
    /// TTS in parallel, spawns the provider-event forwarding tasks, and
    /// emits `ready`. On provider failure emits `init_error` and returns
    /// `Err` so the caller tears the session down.
    pub async fn init(self: &Arc<Self>, voice_id: Option<String>) -> GatewayResult<()> {
        let stt_connect = self.stt.connect(self.session.id);
        let tts_connect = self.tts.connect(self.session.id, voice_id);

        let (stt_events, tts_events) = match tokio::try_join!(stt_connect, tts_connect) {
            Ok(pair) => pair,
            Err(e) => {
                self.send_error(WireErrorKind::InitError, e.to_string()).await;
                return Err(GatewayError::InitError(e.to_string()));
            }
        };

        {
            let mut state = self.session.state.lock();
            state.stt_connected = true;
            state.tts_connected = true;
            state.active = true;
        }

        self.spawn_stt_forwarder(stt_events.transcripts, stt_events.errors);
        self.spawn_tts_forwarder(tts_events.audio, tts_events.complete, tts_events.errors);

        let stt_info = self.stt.info();
        let llm_info = self.llm.info();
        let tts_info = self.tts.info();

        self.send_event(
            EventKind::Ready,
            serde_json::json!({
                "sessionId": self.session.id.to_string(),
                "providers": {
                    "stt": provider_info_json(&stt_info),
                    "llm": provider_info_json(&llm_info),
                    "tts": provider_info_json(&tts_info),
                },
            }),
        )
        .await;

        Ok(())
    }

    fn spawn_stt_forwarder(
        self: &Arc<Self>,
        mut transcripts: mpsc::Receiver<crate::providers::TranscriptEvent>,
        mut errors: mpsc::Receiver<ProviderError>,
    ) {
        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    transcript = transcripts.recv() => {
                        match transcript {
                            Some(t) => this.handle_transcript(t).await,
                            None => break,
                        }
                    }
                    error = errors.recv() => {
                        match error {
                            Some(e) => this.handle_provider_error(WireErrorKind::SttError, e).await,
                            None => break,
                        }
                    }
                }
            }
        });
    }

    fn spawn_tts_forwarder(
        self: &Arc<Self>,
        mut audio: mpsc::Receiver<Bytes>,
        mut complete: mpsc::Receiver<()>,
        mut errors: mpsc::Receiver<ProviderError>,
    ) {
        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    chunk = audio.recv() => {
                        match chunk {
                            Some(bytes) => {
                                let tagged = this.session.buffers.tag_chunk(bytes);
                                if this.session.buffers.is_current(&tagged) {
                                    this.sink.send_binary(tagged.bytes).await;
                                }
                            }
                            None => break,
                        }
                    }
                    done = complete.recv() => {
                        if done.is_none() {
                            break;
                        }
                        this.session.buffers.set_speaking(false);
                        {
                            let mut state = this.session.state.lock();
                            state.agent_speaking = false;
                            state.tts_streaming = false;
                        }
                        this.send_event(EventKind::AgentFinishedSpeaking, serde_json::json!({}))
                            .await;
                    }
                    error = errors.recv() => {
                        match error {
                            Some(e) => this.handle_provider_error(WireErrorKind::TtsError, e).await,
                            None => break,
                        }
                    }
                }
            }
        });
    }

    async fn handle_provider_error(&self, kind: WireErrorKind, error: ProviderError) {
        // Cancellation-induced aborts are not errors and must be swallowed
        // (spec §7): a provider only reaches this path through its own error
        // channel, which adapters never feed from a clean cancel path.
        {
            let mut state = self.session.state.lock();
            state.llm_streaming = false;
            state.tts_streaming = false;
        }
        self.send_error(kind, error.to_string()).await;
    }

    /// Handles one inbound binary audio frame (spec §4.5 "Inbound audio path").
    pub async fn handle_audio(&self, bytes: Bytes) {
        let should_barge_in = {
            let state = self.session.state.lock();
            state.agent_speaking || state.llm_streaming
        };
        if should_barge_in {
            self.barge_in().await;
        }

        if let Err(e) = self.stt.send_audio(bytes).await {
            self.send_error(WireErrorKind::AudioProcessingError, e.to_string())
                .await;
        }
        self.session.touch();
    }

    /// Updates session metadata mid-session (client `metadata` frame).
    pub fn handle_metadata(&self, metadata: std::collections::HashMap<String, String>) {
        self.session.metadata.lock().extend(metadata);
        self.session.touch();
    }

    async fn handle_transcript(self: &Arc<Self>, event: crate::providers::TranscriptEvent) {
        self.session.touch();
        if !event.is_final {
            self.send_event(
                EventKind::TranscriptPartial,
                serde_json::json!({"text": event.text, "confidence": event.confidence}),
            )
            .await;
            return;
        }

        self.send_event(
            EventKind::TranscriptFinal,
            serde_json::json!({"text": event.text, "confidence": event.confidence}),
        )
        .await;

        self.run_reply(event.text).await;
    }

    /// The reply procedure (spec §4.5 "Reply procedure"): streams an LLM
    /// reply, flushing completed sentences to TTS, and appends the final
    /// assistant turn to history unless barge-in intervened.
    async fn run_reply(self: &Arc<Self>, user_text: String) {
        self.session.history.lock().append(Role::User, user_text);

        {
            let mut state = self.session.state.lock();
            state.llm_streaming = true;
        }
        *self.pending_reply.lock() = Some(String::new());

        let history = self.session.history.lock().formatted();
        let client_name = self.session.client_name();
        let cancel = CancellationToken::new();

        let mut events = match self.llm.stream_response(history, client_name, cancel).await {
            Ok(events) => events,
            Err(e) => {
                self.handle_provider_error(WireErrorKind::LlmError, e).await;
                *self.pending_reply.lock() = None;
                return;
            }
        };

        let mut accumulator = String::new();

        while let Some(fragment) = events.fragments.recv().await {
            if self.pending_reply.lock().is_none() {
                // Barge-in cleared the pending reply out from under us;
                // stop consuming and do not touch state or history.
                return;
            }

            if let Some(pending) = self.pending_reply.lock().as_mut() {
                pending.push_str(&fragment);
            }
            accumulator.push_str(&fragment);

            self.send_event(EventKind::LlmChunk, serde_json::json!({"chunk": fragment}))
                .await;

            if fragment
                .chars()
                .last()
                .is_some_and(|c| SENTENCE_DELIMITERS.contains(&c))
            {
                self.flush_sentence(&mut accumulator, false).await;
            }
        }

        // `fragments` closing doesn't by itself mean a clean `[DONE]` — a
        // mid-stream upstream failure closes it too. The adapter sends any
        // such error on `errors` before dropping the fragment sender, so by
        // the time `fragments.recv()` observes the close the error (if any)
        // is already sitting in this channel's buffer.
        if let Ok(e) = events.errors.try_recv() {
            self.handle_provider_error(WireErrorKind::LlmError, e).await;
            *self.pending_reply.lock() = None;
            return;
        }

        if !accumulator.is_empty() {
            self.flush_sentence(&mut accumulator, true).await;
        }

        let final_text = self.pending_reply.lock().take();
        if let Some(text) = final_text {
            if !text.is_empty() {
                self.session.history.lock().append(Role::Assistant, text);
            }
        }

        let mut state = self.session.state.lock();
        state.llm_streaming = false;
    }

    async fn flush_sentence(&self, accumulator: &mut String, flush: bool) {
        if accumulator.is_empty() && !flush {
            return;
        }
        let text = std::mem::take(accumulator);
        if let Err(e) = self.tts.synthesize(&text, flush).await {
            self.handle_provider_error(WireErrorKind::SynthesisError, e).await;
            return;
        }
        self.session.buffers.set_speaking(true);
        let mut state = self.session.state.lock();
        state.agent_speaking = true;
        state.tts_streaming = true;
    }

    /// Teardown (spec §4.5 "Teardown"): cancels LLM, disconnects STT/TTS,
    /// clears buffers. Idempotent in the sense that calling it twice is
    /// harmless — each provider's `disconnect` is itself idempotent.
    pub async fn teardown(&self) {
        self.llm.cancel();
        self.stt.disconnect().await;
        self.tts.disconnect().await;
        self.session.buffers.bump_generation();
        *self.pending_reply.lock() = None;
        let mut state = self.session.state.lock();
        state.active = false;
        state.stt_connected = false;
        state.tts_connected = false;
        state.llm_streaming = false;
        state.tts_streaming = false;
        state.agent_speaking = false;
    }
}

fn provider_info_json(info: &ProviderInfo) -> serde_json::Value {
    serde_json::to_value(info).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LlmEvents, ProviderInfo, SttEvents, TranscriptEvent, TtsEvents};
    use crate::session::Turn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSink {
        frames: Mutex<Vec<ServerFrame>>,
        binaries: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                binaries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ClientSink for RecordingSink {
        async fn send_frame(&self, frame: ServerFrame) {
            self.frames.lock().push(frame);
        }
        async fn send_binary(&self, _bytes: Bytes) {
            self.binaries.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeStt {
        audio_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SttProvider for FakeStt {
        async fn connect(&self, _session_id: crate::session::SessionId) -> crate::error::ProviderResult<SttEvents> {
            let (_tx, transcripts) = mpsc::channel::<TranscriptEvent>(1);
            let (_etx, errors) = mpsc::channel(1);
            Ok(SttEvents { transcripts, errors })
        }
        async fn send_audio(&self, _bytes: Bytes) -> crate::error::ProviderResult<()> {
            self.audio_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn info(&self) -> ProviderInfo {
            ProviderInfo { name: "fake-stt", model: "test".into(), language: None, typical_latency_ms: 0 }
        }
        async fn disconnect(&self) {}
    }

    struct FakeLlm {
        cancel_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FakeLlm {
        async fn stream_response(
            &self,
            _history: Vec<Turn>,
            _client_name: Option<String>,
            _cancel: CancellationToken,
        ) -> crate::error::ProviderResult<LlmEvents> {
            let (_tx, fragments) = mpsc::channel(1);
            let (_etx, errors) = mpsc::channel(1);
            Ok(LlmEvents { fragments, errors })
        }
        fn cancel(&self) {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn info(&self) -> ProviderInfo {
            ProviderInfo { name: "fake-llm", model: "test".into(), language: None, typical_latency_ms: 0 }
        }
        fn estimate_cost(&self, _messages: &[Turn]) -> f64 {
            0.0
        }
    }

    struct FakeTts {
        cancel_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TtsProvider for FakeTts {
        async fn connect(
            &self,
            _session_id: crate::session::SessionId,
            _voice_id: Option<String>,
        ) -> crate::error::ProviderResult<TtsEvents> {
            let (_atx, audio) = mpsc::channel(1);
            let (_ctx, complete) = mpsc::channel(1);
            let (_etx, errors) = mpsc::channel(1);
            Ok(TtsEvents { audio, complete, errors })
        }
        async fn synthesize(&self, _text: &str, _flush: bool) -> crate::error::ProviderResult<()> {
            Ok(())
        }
        fn cancel(&self) {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn info(&self) -> ProviderInfo {
            ProviderInfo { name: "fake-tts", model: "test".into(), language: None, typical_latency_ms: 0 }
        }
    }

    struct FailingLlm;

    #[async_trait::async_trait]
    impl LlmProvider for FailingLlm {
        async fn stream_response(
            &self,
            _history: Vec<Turn>,
            _client_name: Option<String>,
            _cancel: CancellationToken,
        ) -> crate::error::ProviderResult<LlmEvents> {
            let (fragment_tx, fragments) = mpsc::channel(4);
            let (error_tx, errors) = mpsc::channel(4);
            // A partial fragment arrives before the upstream connection
            // fails mid-stream; both channels close once this returns.
            let _ = fragment_tx.send("partial reply".to_string()).await;
            let _ = error_tx.send(ProviderError::Upstream("boom".into())).await;
            Ok(LlmEvents { fragments, errors })
        }
        fn cancel(&self) {}
        fn info(&self) -> ProviderInfo {
            ProviderInfo { name: "failing-llm", model: "test".into(), language: None, typical_latency_ms: 0 }
        }
        fn estimate_cost(&self, _messages: &[Turn]) -> f64 {
            0.0
        }
    }

    fn build_orchestrator() -> Arc<Orchestrator> {
        build_orchestrator_with_retention(false)
    }

    fn build_orchestrator_with_llm(llm: Arc<dyn LlmProvider>) -> (Arc<Orchestrator>, Arc<RecordingSink>) {
        let session = Arc::new(Session::new(15));
        let stt: Arc<dyn SttProvider> = Arc::new(FakeStt { audio_calls: AtomicUsize::new(0) });
        let tts: Arc<dyn TtsProvider> = Arc::new(FakeTts { cancel_calls: AtomicUsize::new(0) });
        let sink = RecordingSink::new();
        let spawner = TokioSpawner::current();
        let orchestrator = Orchestrator::new(
            session,
            stt,
            llm,
            tts,
            Arc::clone(&sink) as Arc<dyn ClientSink>,
            spawner,
            false,
        );
        (orchestrator, sink)
    }

    fn build_orchestrator_with_retention(retain_interrupted_turns: bool) -> Arc<Orchestrator> {
        let session = Arc::new(Session::new(15));
        let stt: Arc<dyn SttProvider> = Arc::new(FakeStt { audio_calls: AtomicUsize::new(0) });
        let llm: Arc<dyn LlmProvider> = Arc::new(FakeLlm { cancel_calls: AtomicUsize::new(0) });
        let tts: Arc<dyn TtsProvider> = Arc::new(FakeTts { cancel_calls: AtomicUsize::new(0) });
        let sink = RecordingSink::new();
        let spawner = TokioSpawner::current();
        Orchestrator::new(session, stt, llm, tts, sink, spawner, retain_interrupted_turns)
    }

    #[test]
    fn sentence_delimiter_detection_matches_configured_set() {
        for c in SENTENCE_DELIMITERS {
            assert!("Vale.".ends_with(*c) || *c != '.');
        }
    }

    #[tokio::test]
    async fn barge_in_resets_state_and_bumps_generation() {
        let orchestrator = build_orchestrator();
        {
            let mut state = orchestrator.session.state.lock();
            state.agent_speaking = true;
            state.tts_streaming = true;
            state.llm_streaming = true;
        }
        *orchestrator.pending_reply.lock() = Some("partial reply".into());
        let generation_before = orchestrator.session.buffers.generation();

        orchestrator.barge_in().await;

        let state = orchestrator.session.state.lock();
        assert!(!state.agent_speaking);
        assert!(!state.tts_streaming);
        assert!(!state.llm_streaming);
        assert!(orchestrator.pending_reply.lock().is_none());
        assert!(orchestrator.session.buffers.generation() > generation_before);
    }

    #[tokio::test]
    async fn handle_audio_triggers_barge_in_while_agent_speaking() {
        let orchestrator = build_orchestrator();
        {
            let mut state = orchestrator.session.state.lock();
            state.agent_speaking = true;
        }
        let generation_before = orchestrator.session.buffers.generation();

        orchestrator.handle_audio(Bytes::from_static(b"frame")).await;

        assert!(orchestrator.session.buffers.generation() > generation_before);
        assert!(!orchestrator.session.state.lock().agent_speaking);
    }

    #[tokio::test]
    async fn barge_in_with_retention_appends_interrupted_reply_to_history() {
        let orchestrator = build_orchestrator_with_retention(true);
        *orchestrator.pending_reply.lock() = Some("partial reply".into());

        orchestrator.barge_in().await;

        assert!(orchestrator.pending_reply.lock().is_none());
        let history = orchestrator.session.history.lock().formatted();
        assert!(history
            .iter()
            .any(|turn| matches!(turn.role, crate::session::Role::Assistant) && turn.content == "partial reply"));
    }

    #[tokio::test]
    async fn handle_audio_forwards_without_barge_in_when_idle() {
        let orchestrator = build_orchestrator();
        let generation_before = orchestrator.session.buffers.generation();

        orchestrator.handle_audio(Bytes::from_static(b"frame")).await;

        assert_eq!(orchestrator.session.buffers.generation(), generation_before);
    }

    #[tokio::test]
    async fn run_reply_emits_llm_error_and_skips_history_append_on_stream_failure() {
        let (orchestrator, sink) = build_orchestrator_with_llm(Arc::new(FailingLlm));

        orchestrator.run_reply("hello".to_string()).await;

        let history = orchestrator.session.history.lock().formatted();
        assert!(!history
            .iter()
            .any(|turn| matches!(turn.role, crate::session::Role::Assistant)));
        assert!(orchestrator.pending_reply.lock().is_none());

        let frames = sink.frames.lock();
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::Error { error: WireErrorKind::LlmError, .. })));
    }
}
