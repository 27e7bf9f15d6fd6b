//! Streaming STT adapter: a persistent WebSocket connection to a recognizer.
//!
//! Each inbound audio frame is forwarded verbatim. Inbound recognizer
//! messages are interim transcript, final transcript, utterance-end marker,
//! metadata, warning, or error; this adapter surfaces transcript messages
//! as `TranscriptEvent`s (ignoring empty text, spec §4.2) and errors as
//! `ProviderError`s. `connect` races the handshake against a 5s timeout
//! (spec §4.1, §5 "Timeouts").

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{ProviderError, ProviderResult};
use crate::protocol_constants::{PROVIDER_CHANNEL_CAPACITY, PROVIDER_CONNECT_TIMEOUT_SECS};
use crate::providers::junk_phrases::JunkPhraseFilter;
use crate::providers::{ProviderInfo, SttEvents, SttProvider, TranscriptEvent};
use crate::session::SessionId;

/// Configuration for the streaming STT adapter.
#[derive(Debug, Clone)]
pub struct StreamingSttConfig {
    pub ws_url: String,
    pub api_key: String,
    pub model: String,
    pub language: Option<String>,
    pub junk_phrases: Vec<String>,
}

/// Recognizer message envelope. Field names follow the common
/// interim/final-transcript streaming ASR shape; unknown message kinds are
/// ignored rather than treated as errors.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RecognizerMessage {
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        confidence: f32,
    },
    UtteranceEnd,
    Metadata,
    Warning {
        #[serde(default)]
        message: String,
    },
    Error {
        message: String,
    },
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// True-streaming STT adapter over a persistent WebSocket connection.
pub struct StreamingSttProvider {
    config: StreamingSttConfig,
    filter: JunkPhraseFilter,
    sink: Mutex<Option<WsSink>>,
    connected: AtomicBool,
}

impl StreamingSttProvider {
    pub fn new(config: StreamingSttConfig) -> Self {
        let filter = JunkPhraseFilter::new(config.junk_phrases.clone());
        Self {
            config,
            filter,
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn handle_recognizer_message(
        filter: &JunkPhraseFilter,
        msg: RecognizerMessage,
        transcripts: &mpsc::Sender<TranscriptEvent>,
        errors: &mpsc::Sender<ProviderError>,
    ) {
        match msg {
            RecognizerMessage::Transcript {
                text,
                is_final,
                confidence,
            } => {
                if let Some(text) = filter.filter(&text) {
                    let _ = transcripts.try_send(TranscriptEvent {
                        text: text.to_string(),
                        is_final,
                        confidence,
                    });
                }
            }
            RecognizerMessage::Error { message } => {
                let _ = errors.try_send(ProviderError::Upstream(message));
            }
            RecognizerMessage::UtteranceEnd
            | RecognizerMessage::Metadata
            | RecognizerMessage::Warning { .. } => {}
        }
    }
}

#[async_trait]
impl SttProvider for StreamingSttProvider {
    async fn connect(&self, session_id: SessionId) -> ProviderResult<SttEvents> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(ProviderError::AlreadyConnected);
        }

        let connect_fut = tokio_tungstenite::connect_async(&self.config.ws_url);
        let (ws_stream, _response) = tokio::time::timeout(
            Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS),
            connect_fut,
        )
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        log::info!("[SttStreaming] connected for session {}", session_id);

        let (sink, mut stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);

        let (transcript_tx, transcript_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let filter = self.filter.clone();

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<RecognizerMessage>(&text) {
                            Ok(msg) => Self::handle_recognizer_message(
                                &filter,
                                msg,
                                &transcript_tx,
                                &error_tx,
                            ),
                            Err(_) => {
                                log::debug!("[SttStreaming] unrecognized message, ignoring");
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = error_tx
                            .try_send(ProviderError::Disconnected(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(SttEvents {
            transcripts: transcript_rx,
            errors: error_rx,
        })
    }

    async fn send_audio(&self, bytes: Bytes) -> ProviderResult<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ProviderError::Disconnected("not connected".into()))?;
        sink.send(WsMessage::Binary(bytes.to_vec()))
            .await
            .map_err(|e| ProviderError::Disconnected(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "stt-streaming",
            model: self.config.model.clone(),
            language: self.config.language.clone(),
            typical_latency_ms: 150,
        }
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_phrase_filter_suppresses_configured_phrase() {
        let filter = JunkPhraseFilter::new(vec!["silencio".to_string()]);
        assert_eq!(filter.filter("silencio"), None);
    }

    #[tokio::test]
    async fn disconnect_on_fresh_provider_is_a_noop() {
        let provider = StreamingSttProvider::new(StreamingSttConfig {
            ws_url: "wss://example.invalid/stt".into(),
            api_key: "test".into(),
            model: "default".into(),
            language: Some("es".into()),
            junk_phrases: vec![],
        });
        provider.disconnect().await;
        assert!(!provider.is_connected());
    }
}
