//! Buffered STT adapter: accumulates inbound audio and submits one-shot
//! transcription calls instead of holding a persistent recognizer socket.
//!
//! Used for providers whose HTTP transcription endpoint is cheaper or more
//! accurate than their streaming one at the cost of latency (spec §4.2).
//! Every arriving frame is checked against the minimum chunk size as soon as
//! it lands: a frame that alone (or together with whatever is already
//! buffered) clears the threshold is submitted immediately as one
//! synchronous transcription call, rather than waiting on the sweep. A
//! background sweep still fires on a fixed interval to pick up residue that
//! never individually cleared the threshold; a sweep finding too little
//! audio is a no-op, not an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};
use crate::protocol_constants::{
    PROVIDER_CHANNEL_CAPACITY, STT_BUFFERED_MIN_CHUNK_BYTES, STT_BUFFERED_SWEEP_INTERVAL_SECS,
};
use crate::providers::junk_phrases::JunkPhraseFilter;
use crate::providers::{ProviderInfo, SttEvents, SttProvider, TranscriptEvent};
use crate::session::SessionId;

/// Configuration for the buffered STT adapter.
#[derive(Debug, Clone)]
pub struct BufferedSttConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    pub language: Option<String>,
    pub junk_phrases: Vec<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
}

async fn transcribe(
    client: &Client,
    config: &BufferedSttConfig,
    filter: &JunkPhraseFilter,
    audio: Vec<u8>,
) -> ProviderResult<Option<TranscriptEvent>> {
    let start = std::time::Instant::now();
    let res = client
        .post(&config.endpoint_url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Content-Type", "application/octet-stream")
        .query(&[("model", config.model.as_str())])
        .body(audio)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ProviderError::Upstream(e.to_string()))?;

    let elapsed = start.elapsed();
    let status = res.status();
    log::info!("[SttBuffered] transcription call completed in {:?}: {}", elapsed, status);

    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ProviderError::Upstream(format!("{}: {}", status, body)));
    }

    let parsed: TranscriptionResponse = res
        .json()
        .await
        .map_err(|e| ProviderError::Upstream(e.to_string()))?;

    Ok(filter.filter(&parsed.text).map(|text| TranscriptEvent {
        text: text.to_string(),
        is_final: true,
        confidence: parsed.confidence,
    }))
}

/// One-shot HTTP transcription adapter with a periodic accumulator sweep.
pub struct BufferedSttProvider {
    config: BufferedSttConfig,
    filter: JunkPhraseFilter,
    client: Client,
    buffer: Arc<Mutex<Vec<u8>>>,
    connected: AtomicBool,
    sweep_cancel: Mutex<Option<CancellationToken>>,
    /// Cloned into `send_audio` so an arriving frame that clears the
    /// threshold can be submitted immediately, without waiting on the sweep.
    channels: Mutex<Option<(mpsc::Sender<TranscriptEvent>, mpsc::Sender<ProviderError>)>>,
}

impl BufferedSttProvider {
    pub fn new(config: BufferedSttConfig) -> Self {
        let filter = JunkPhraseFilter::new(config.junk_phrases.clone());
        Self {
            config,
            filter,
            client: Client::new(),
            buffer: Arc::new(Mutex::new(Vec::new())),
            connected: AtomicBool::new(false),
            sweep_cancel: Mutex::new(None),
            channels: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SttProvider for BufferedSttProvider {
    async fn connect(&self, session_id: SessionId) -> ProviderResult<SttEvents> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(ProviderError::AlreadyConnected);
        }
        self.connected.store(true, Ordering::SeqCst);
        self.buffer.lock().clear();

        log::info!("[SttBuffered] session {} starting accumulator sweep", session_id);

        let (transcript_tx, transcript_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);

        *self.channels.lock() = Some((transcript_tx.clone(), error_tx.clone()));

        let cancel = CancellationToken::new();
        *self.sweep_cancel.lock() = Some(cancel.clone());

        let buffer = Arc::clone(&self.buffer);
        let client = self.client.clone();
        let config = self.config.clone();
        let filter = self.filter.clone();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(STT_BUFFERED_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let chunk = {
                            let mut buf = buffer.lock();
                            if buf.len() < STT_BUFFERED_MIN_CHUNK_BYTES {
                                continue;
                            }
                            std::mem::take(&mut *buf)
                        };
                        match transcribe(&client, &config, &filter, chunk).await {
                            Ok(Some(event)) => {
                                let _ = transcript_tx.try_send(event);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                let _ = error_tx.try_send(e);
                            }
                        }
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
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ProviderError::Disconnected("not connected".into()));
        }

        let chunk = {
            let mut buf = self.buffer.lock();
            buf.extend_from_slice(&bytes);
            if buf.len() < STT_BUFFERED_MIN_CHUNK_BYTES {
                return Ok(());
            }
            std::mem::take(&mut *buf)
        };

        // Clearing the threshold on arrival submits this as one synchronous
        // transcription call right away instead of waiting for the next
        // sweep tick; the sweep remains for residue that never individually
        // clears it.
        let Some((transcript_tx, error_tx)) = self.channels.lock().clone() else {
            return Ok(());
        };
        let client = self.client.clone();
        let config = self.config.clone();
        let filter = self.filter.clone();
        tokio::spawn(async move {
            match transcribe(&client, &config, &filter, chunk).await {
                Ok(Some(event)) => {
                    let _ = transcript_tx.try_send(event);
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = error_tx.try_send(e);
                }
            }
        });

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "stt-buffered",
            model: self.config.model.clone(),
            language: self.config.language.clone(),
            typical_latency_ms: 900,
        }
    }

    async fn disconnect(&self) {
        if let Some(cancel) = self.sweep_cancel.lock().take() {
            cancel.cancel();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.buffer.lock().clear();
        self.channels.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_audio_before_connect_is_rejected() {
        let provider = BufferedSttProvider::new(BufferedSttConfig {
            endpoint_url: "https://example.invalid/transcribe".into(),
            api_key: "key".into(),
            model: "default".into(),
            language: None,
            junk_phrases: vec![],
        });
        let result = provider.send_audio(Bytes::from_static(b"abc")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_audio_drains_buffer_immediately_once_threshold_is_cleared() {
        let provider = BufferedSttProvider::new(BufferedSttConfig {
            endpoint_url: "https://example.invalid/transcribe".into(),
            api_key: "key".into(),
            model: "default".into(),
            language: None,
            junk_phrases: vec![],
        });
        let session_id = SessionId::new();
        let _events = provider.connect(session_id).await.unwrap();

        provider
            .send_audio(Bytes::from(vec![0u8; STT_BUFFERED_MIN_CHUNK_BYTES]))
            .await
            .unwrap();

        // A frame that alone clears the threshold is handed off to an
        // immediate transcription call rather than sitting in the buffer
        // until the next sweep.
        assert!(provider.buffer.lock().is_empty());
    }

    #[tokio::test]
    async fn send_audio_below_threshold_stays_buffered() {
        let provider = BufferedSttProvider::new(BufferedSttConfig {
            endpoint_url: "https://example.invalid/transcribe".into(),
            api_key: "key".into(),
            model: "default".into(),
            language: None,
            junk_phrases: vec![],
        });
        let session_id = SessionId::new();
        let _events = provider.connect(session_id).await.unwrap();

        provider
            .send_audio(Bytes::from(vec![0u8; STT_BUFFERED_MIN_CHUNK_BYTES / 2]))
            .await
            .unwrap();

        assert_eq!(provider.buffer.lock().len(), STT_BUFFERED_MIN_CHUNK_BYTES / 2);
    }

    #[tokio::test]
    async fn connect_then_disconnect_clears_buffer() {
        let provider = BufferedSttProvider::new(BufferedSttConfig {
            endpoint_url: "https://example.invalid/transcribe".into(),
            api_key: "key".into(),
            model: "default".into(),
            language: None,
            junk_phrases: vec![],
        });
        let session_id = SessionId::new();
        let _events = provider.connect(session_id).await.unwrap();
        provider
            .send_audio(Bytes::from(vec![0u8; 128]))
            .await
            .unwrap();
        provider.disconnect().await;
        assert!(!provider.is_connected());
    }
}
