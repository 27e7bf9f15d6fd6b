//! TTS adapter: a bidirectional WebSocket connection to a streaming
//! synthesizer, with the cancel-without-disconnect invariant spec §4.4/§9
//! calls out as the most common naive-implementation failure.
//!
//! `cancel()` sends a single-space flush frame and sets an internal
//! `cancelled` flag; the reader task drops any audio chunk received while
//! the flag is set. The flag is cleared by the next `synthesize()` call.
//! The provider connection itself is never touched by `cancel()` — only
//! `disconnect()` closes it. This mirrors `ConnectionGuard`'s separation of
//! "this connection is cancelled" from "this connection is closed", except
//! here the thing being cancelled is in-flight *work*, not the socket.
//!
//! `cancel()` is synchronous and can't await the socket directly, so the
//! sink is owned by a dedicated writer task (the same shape as
//! `wire/ws.rs`'s outbound channel): frames are queued onto an `mpsc`
//! channel the writer drains into the socket. `cancel()`'s flush frame is
//! a non-blocking `try_send` onto that channel, so it is always actually
//! queued for delivery rather than merely buffered and forgotten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{ProviderError, ProviderResult};
use crate::protocol_constants::{
    PROVIDER_CHANNEL_CAPACITY, PROVIDER_CONNECT_TIMEOUT_SECS, TTS_DISCONNECT_DRAIN_MS,
};
use crate::providers::{ProviderInfo, TtsEvents, TtsProvider};
use crate::session::SessionId;

/// Configuration for the TTS adapter.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub ws_url: String,
    pub api_key: String,
    pub model: String,
    pub voice_id: String,
    /// Per-chunk latency/quality tradeoff schedule sent in the
    /// beginning-of-stream frame (spec §4.4).
    pub chunk_length_schedule: Vec<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BeginOfStreamFrame<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct VoiceSettings {
    voice_id: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    chunk_length_schedule: Vec<u32>,
}

#[derive(Serialize)]
struct SynthesizeFrame<'a> {
    text: &'a str,
    try_trigger_generation: bool,
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Streaming TTS adapter, speaking the begin/synthesize/cancel/disconnect
/// protocol from spec §4.4 over a persistent WebSocket.
pub struct WsTtsProvider {
    config: TtsConfig,
    /// Owned exclusively by the writer task spawned in `connect()`; every
    /// outbound frame is queued here instead of touching the socket
    /// directly, so a synchronous caller (`cancel()`) can still enqueue one.
    outbound: Mutex<Option<mpsc::Sender<WsMessage>>>,
    connected: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl WsTtsProvider {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn send_frame(&self, frame: &impl Serialize) -> ProviderResult<()> {
        let json = serde_json::to_string(frame)
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Disconnected("not connected".into()))?;
        sender
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| ProviderError::Disconnected(e.to_string()))
    }
}

#[async_trait]
impl TtsProvider for WsTtsProvider {
    async fn connect(
        &self,
        session_id: SessionId,
        voice_id: Option<String>,
    ) -> ProviderResult<TtsEvents> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(ProviderError::AlreadyConnected);
        }

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS),
            tokio_tungstenite::connect_async(&self.config.ws_url),
        )
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        log::info!("[Tts] connected for session {}", session_id);

        let (mut sink, mut stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(PROVIDER_CHANNEL_CAPACITY);

        let begin = BeginOfStreamFrame {
            text: " ",
            voice_settings: VoiceSettings {
                voice_id: voice_id.unwrap_or_else(|| self.config.voice_id.clone()),
            },
            generation_config: GenerationConfig {
                chunk_length_schedule: self.config.chunk_length_schedule.clone(),
            },
        };
        let begin_json =
            serde_json::to_string(&begin).map_err(|e| ProviderError::Upstream(e.to_string()))?;
        sink.send(WsMessage::Text(begin_json))
            .await
            .map_err(|e| ProviderError::Disconnected(e.to_string()))?;

        // The writer task owns `sink` exclusively from here on: every other
        // outbound frame (`synthesize`, `cancel`, `disconnect`) is queued
        // through `outbound_tx` instead. Dropping every clone of
        // `outbound_tx` drains the queue, then ends the task and closes the
        // socket.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        *self.outbound.lock().await = Some(outbound_tx);
        self.connected.store(true, Ordering::SeqCst);

        let (audio_tx, audio_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let (complete_tx, complete_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let cancelled = Arc::clone(&self.cancelled);

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(inbound) => {
                                if cancelled.load(Ordering::SeqCst) {
                                    continue;
                                }
                                if let Some(audio_b64) = inbound.audio {
                                    if let Ok(bytes) = base64::engine::general_purpose::STANDARD
                                        .decode(audio_b64)
                                    {
                                        let _ = audio_tx.try_send(bytes::Bytes::from(bytes));
                                    }
                                }
                                if inbound.is_final {
                                    let _ = complete_tx.try_send(());
                                }
                                if let Some(message) = inbound.error {
                                    let _ = error_tx.try_send(ProviderError::Upstream(message));
                                }
                            }
                            Err(_) => log::debug!("[Tts] unrecognized inbound frame, ignoring"),
                        }
                    }
                    Ok(WsMessage::Binary(data)) => {
                        if !cancelled.load(Ordering::SeqCst) {
                            let _ = audio_tx.try_send(bytes::Bytes::from(data));
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = error_tx.try_send(ProviderError::Disconnected(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(TtsEvents {
            audio: audio_rx,
            complete: complete_rx,
            errors: error_rx,
        })
    }

    async fn synthesize(&self, text: &str, flush: bool) -> ProviderResult<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.send_frame(&SynthesizeFrame {
            text,
            try_trigger_generation: flush,
        })
        .await
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // try_lock: cancel() is synchronous and can't await the mutex. The
        // lock is only ever held for the instant it takes to clone the
        // sender, so contention here is vanishingly rare; if it does happen
        // the flag above (checked by the reader task) still suppresses
        // stale audio, and the flush frame below is simply skipped rather
        // than queued out of order.
        if let Ok(guard) = self.outbound.try_lock() {
            if let Some(sender) = guard.as_ref() {
                let frame = SynthesizeFrame {
                    text: " ",
                    try_trigger_generation: true,
                };
                if let Ok(json) = serde_json::to_string(&frame) {
                    let _ = sender.try_send(WsMessage::Text(json));
                }
            }
        }
    }

    async fn disconnect(&self) {
        let _ = self.send_frame(&SynthesizeFrame {
            text: "",
            try_trigger_generation: false,
        })
        .await;
        tokio::time::sleep(Duration::from_millis(TTS_DISCONNECT_DRAIN_MS)).await;

        // Dropping the only remaining sender drains the writer task's queue
        // (the frame sent above included) and then ends it; the writer
        // closes the socket itself once its channel returns `None`.
        self.outbound.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "tts",
            model: self.config.model.clone(),
            language: None,
            typical_latency_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_on_never_connected_provider_does_not_panic() {
        let provider = WsTtsProvider::new(TtsConfig {
            ws_url: "wss://example.invalid/tts".into(),
            api_key: "key".into(),
            model: "default".into(),
            voice_id: "voice-1".into(),
            chunk_length_schedule: vec![120, 160, 250, 290],
        });
        provider.cancel();
        assert!(!provider.is_connected());
    }

    #[tokio::test]
    async fn cancel_enqueues_a_flush_frame_onto_the_writer_channel() {
        let provider = WsTtsProvider::new(TtsConfig {
            ws_url: "wss://example.invalid/tts".into(),
            api_key: "key".into(),
            model: "default".into(),
            voice_id: "voice-1".into(),
            chunk_length_schedule: vec![120, 160, 250, 290],
        });
        let (tx, mut rx) = mpsc::channel::<WsMessage>(4);
        *provider.outbound.lock().await = Some(tx);

        provider.cancel();

        let msg = rx.try_recv().expect("cancel should enqueue a flush frame");
        match msg {
            WsMessage::Text(text) => {
                assert!(text.contains("\"text\":\" \""));
                assert!(text.contains("\"try_trigger_generation\":true"));
            }
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}
