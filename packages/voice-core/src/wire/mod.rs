//! Client ↔ server wire protocol (spec §6).
//!
//! Text frames carry a `type` discriminator; binary frames carry opaque
//! audio bytes in both directions. `ws.rs` holds the axum upgrade handler
//! that pairs one physical socket with one orchestrator.

mod ws;

pub use ws::ws_handler;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frames the client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    Init {
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    /// Updates session metadata mid-session.
    Metadata { metadata: HashMap<String, String> },
}

/// Event kinds carried in a `ServerFrame::Event`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    TranscriptPartial,
    TranscriptFinal,
    LlmChunk,
    AgentFinishedSpeaking,
    InterruptionProcessed,
}

/// Error kinds carried in a `ServerFrame::Error` (spec §7).
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    InitError,
    SttError,
    LlmError,
    TtsError,
    AudioProcessingError,
    MessageProcessingError,
    SynthesisError,
}

/// Frames the server may send.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event {
        event: EventKind,
        data: serde_json::Value,
        timestamp: u64,
    },
    Error {
        error: WireErrorKind,
        message: String,
        timestamp: u64,
    },
}

impl ServerFrame {
    pub fn event(event: EventKind, data: serde_json::Value) -> Self {
        Self::Event {
            event,
            data,
            timestamp: crate::utils::now_millis(),
        }
    }

    pub fn error(error: WireErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error,
            message: message.into(),
            timestamp: crate::utils::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_frame_parses_with_empty_metadata() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
        matches!(frame, ClientFrame::Init { .. });
    }

    #[test]
    fn server_event_frame_serializes_with_discriminator() {
        let frame = ServerFrame::event(EventKind::Ready, serde_json::json!({"sessionId": "x"}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"ready\""));
    }
}
