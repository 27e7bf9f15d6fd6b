//! Centralized error types for the voice gateway core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Errors a provider adapter (STT/LLM/TTS) can report.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ProviderError {
    /// Upstream is unreachable, refused the connection, or rejected credentials.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// `connect()` did not complete within the provider connect timeout.
    #[error("provider connect timed out")]
    Timeout,

    /// `connect()` called twice on an already-connected adapter.
    #[error("provider already connected")]
    AlreadyConnected,

    /// Upstream reported an error mid-stream (not a cancellation).
    #[error("provider error: {0}")]
    Upstream(String),

    /// The provider connection dropped unexpectedly.
    #[error("provider disconnected: {0}")]
    Disconnected(String),
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "provider_unavailable",
            Self::Timeout => "provider_timeout",
            Self::AlreadyConnected => "provider_already_connected",
            Self::Upstream(_) => "provider_upstream_error",
            Self::Disconnected(_) => "provider_disconnected",
        }
    }
}

/// Error kinds surfaced to the client as `{type: "error", error: <kind>, ...}`.
///
/// These map directly onto the wire protocol's error discriminator (see
/// [`crate::wire`]) and are also the application-wide error type for the
/// HTTP surface.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum GatewayError {
    /// Failure during session setup (provider connect failed, etc). Session is torn down.
    #[error("session init failed: {0}")]
    InitError(String),

    /// STT provider reported an error during an active turn.
    #[error("stt error: {0}")]
    SttError(String),

    /// LLM provider reported an error during an active turn.
    #[error("llm error: {0}")]
    LlmError(String),

    /// TTS provider reported an error during an active turn.
    #[error("tts error: {0}")]
    TtsError(String),

    /// Inbound audio could not be forwarded to STT (e.g. STT disconnected).
    #[error("audio processing error: {0}")]
    AudioProcessingError(String),

    /// Client sent a malformed frame. Recoverable.
    #[error("message processing error: {0}")]
    MessageProcessingError(String),

    /// TTS could not accept submitted text.
    #[error("synthesis error: {0}")]
    SynthesisError(String),

    /// Requested session ID does not exist in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the wire-protocol `error` discriminator for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InitError(_) => "init_error",
            Self::SttError(_) => "stt_error",
            Self::LlmError(_) => "llm_error",
            Self::TtsError(_) => "tts_error",
            Self::AudioProcessingError(_) => "audio_processing_error",
            Self::MessageProcessingError(_) => "message_processing_error",
            Self::SynthesisError(_) => "synthesis_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::MessageProcessingError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => Self::InitError("provider connect timed out".into()),
            other => Self::InitError(other.to_string()),
        }
    }
}

/// Convenient Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Convenient Result alias for application-wide operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_returns_correct_code() {
        let err = GatewayError::SessionNotFound("abc".into());
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn message_processing_error_is_bad_request() {
        let err = GatewayError::MessageProcessingError("bad json".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_timeout_converts_to_init_error() {
        let gw: GatewayError = ProviderError::Timeout.into();
        assert_eq!(gw.code(), "init_error");
    }
}
