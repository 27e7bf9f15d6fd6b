//! Shared constants for the gateway protocol and provider timeouts.

/// Timeout for a provider `connect()` call before it is treated as `Timeout`.
pub const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Minimum buffered-STT chunk size, in bytes, before it is worth a transcription call.
/// A design-level proxy for roughly one second of compressed voice.
pub const STT_BUFFERED_MIN_CHUNK_BYTES: usize = 30_000;

/// Interval between buffered-STT accumulator sweeps.
pub const STT_BUFFERED_SWEEP_INTERVAL_SECS: u64 = 2;

/// Interval between session registry reaper ticks.
pub const SESSION_REAPER_INTERVAL_SECS: u64 = 60;

/// Default session inactivity timeout, in milliseconds (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1_800_000;

/// Default maximum number of turns retained in session history.
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 15;

/// Sentence delimiters that close a rolling TTS accumulator segment.
pub const SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '\n'];

/// How long `disconnect()` waits for the TTS provider to drain before closing.
pub const TTS_DISCONNECT_DRAIN_MS: u64 = 100;

/// Service identifier reported by the `/health` and `/info` endpoints.
pub const SERVICE_ID: &str = "voice-gateway";

/// Path the client-facing duplex WebSocket is served on.
pub const WS_ROUTE: &str = "/v2/voice";

/// Capacity of the per-session provider event channels (transcript, audio chunk, error).
pub const PROVIDER_CHANNEL_CAPACITY: usize = 64;
