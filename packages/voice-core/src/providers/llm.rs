//! LLM adapter: a reqwest-based streaming chat-completions client.
//!
//! Upstream responses are OpenAI-shaped server-sent-event streams
//! (`data: {...}` lines terminated by `data: [DONE]`). A small line buffer
//! absorbs partial lines split across TCP chunks before each complete line
//! is parsed; only the incremental `delta.content` fragments are forwarded
//! (spec §4.3: "lazy finite sequence of text fragments").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};
use crate::protocol_constants::PROVIDER_CHANNEL_CAPACITY;
use crate::providers::{LlmEvents, LlmProvider, ProviderInfo};
use crate::session::{Role, Turn};

/// Configuration for the LLM adapter.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    /// Prepended as a `system` turn ahead of history on every call.
    pub system_directive: String,
    pub cost_per_1k_input_tokens: f64,
    pub cost_per_1k_output_tokens: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    delta: ChatDelta,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Feeds raw TCP chunks in, yields complete `data:` payload lines out.
/// Lines without a `data:` prefix are ignored; `[DONE]` yields `None`.
#[derive(Default)]
struct SseLineBuffer {
    buffer: String,
}

enum SseEvent {
    Data(String),
    Done,
}

impl SseLineBuffer {
    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "data: [DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            if let Some(data) = trimmed.strip_prefix("data: ") {
                if !data.trim().is_empty() {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Streaming chat-completions adapter.
pub struct HttpLlmProvider {
    config: LlmConfig,
    client: Client,
    active_cancel: parking_lot::Mutex<Option<CancellationToken>>,
    cancelled: Arc<AtomicBool>,
}

impl HttpLlmProvider {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            active_cancel: parking_lot::Mutex::new(None),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn stream_response(
        &self,
        history: Vec<Turn>,
        client_name: Option<String>,
        cancel: CancellationToken,
    ) -> ProviderResult<LlmEvents> {
        self.cancelled.store(false, Ordering::SeqCst);
        *self.active_cancel.lock() = Some(cancel.clone());

        let mut directive = self.config.system_directive.clone();
        if let Some(name) = client_name {
            directive.push_str(&format!(" The caller's name is {name}."));
        }

        let mut messages = vec![ChatMessage {
            role: "system",
            content: directive,
        }];
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: role_str(turn.role),
            content: turn.content.clone(),
        }));

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: true,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.config.endpoint_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        log::info!(
            "[Llm] request accepted after {:?}: {}",
            start.elapsed(),
            response.status()
        );

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("{}: {}", status, body)));
        }

        let (fragment_tx, fragment_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let cancelled = Arc::clone(&self.cancelled);

        tokio::spawn(async move {
            let mut body_stream = response.bytes_stream();
            let mut sse = SseLineBuffer::default();

            loop {
                tokio::select! {
                    // A cancellation-induced abort is not an error; stop
                    // silently so the caller never sees a spurious `llm_error`.
                    _ = cancel.cancelled() => {
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    chunk = body_stream.next() => {
                        let Some(chunk) = chunk else { break };
                        let bytes = match chunk {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                let _ = error_tx.try_send(ProviderError::Upstream(e.to_string()));
                                break;
                            }
                        };
                        for event in sse.feed(&bytes) {
                            match event {
                                SseEvent::Done => return,
                                SseEvent::Data(payload) => {
                                    if let Ok(parsed) = serde_json::from_str::<ChatChunk>(&payload) {
                                        if let Some(choice) = parsed.choices.into_iter().next() {
                                            if let Some(content) = choice.delta.content {
                                                if !content.is_empty() && fragment_tx.send(content).await.is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(LlmEvents {
            fragments: fragment_rx,
            errors: error_rx,
        })
    }

    fn cancel(&self) {
        if let Some(cancel) = self.active_cancel.lock().as_ref() {
            cancel.cancel();
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "llm",
            model: self.config.model.clone(),
            language: None,
            typical_latency_ms: 400,
        }
    }

    fn estimate_cost(&self, messages: &[Turn]) -> f64 {
        let approx_tokens: usize = messages.iter().map(|t| t.content.len() / 4).sum();
        (approx_tokens as f64 / 1000.0) * self.config.cost_per_1k_input_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_buffer_splits_multiple_events_in_one_chunk() {
        let mut buf = SseLineBuffer::default();
        let events = buf.feed(b"data: {\"a\":1}\ndata: {\"a\":2}\n\n");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn sse_buffer_holds_partial_line_across_feeds() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.feed(b"data: {\"a\"").is_empty());
        let events = buf.feed(b":1}\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn sse_buffer_recognizes_done_sentinel() {
        let mut buf = SseLineBuffer::default();
        let events = buf.feed(b"data: [DONE]\n");
        assert!(matches!(events.as_slice(), [SseEvent::Done]));
    }

    #[test]
    fn estimate_cost_is_proportional_to_content_length() {
        let provider = HttpLlmProvider::new(LlmConfig {
            endpoint_url: "https://example.invalid/chat".into(),
            api_key: "key".into(),
            model: "default".into(),
            system_directive: "You are a helpful voice assistant.".into(),
            cost_per_1k_input_tokens: 0.002,
            cost_per_1k_output_tokens: 0.002,
        });
        let short = vec![Turn {
            role: Role::User,
            content: "hi".into(),
            timestamp: 0,
        }];
        let long = vec![Turn {
            role: Role::User,
            content: "hi".repeat(500),
            timestamp: 0,
        }];
        assert!(provider.estimate_cost(&long) > provider.estimate_cost(&short));
    }
}
