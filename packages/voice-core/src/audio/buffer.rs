//! Per-session inbound/outbound audio byte queues with a generation counter.
//!
//! The output queue carries a monotonically increasing "generation": barge-in
//! bumps it, and any chunk stamped with a stale generation is discarded in
//! transit instead of being written to the client socket (spec: §3 "Audio
//! queues", §8 invariant on output generations). Grounded on
//! `stream::manager::StreamTiming`'s `epoch_counter` pattern, repurposed here
//! from latency bookkeeping to cancellation correctness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::utils::now_millis;

/// One opaque audio chunk tagged with the output generation it was produced
/// in, plus its enqueue time (spec: §3 "Chunks carry `{bytes, enqueue_time}`").
#[derive(Clone)]
pub struct AudioChunk {
    pub bytes: Bytes,
    pub enqueue_time: u64,
    pub generation: u64,
}

/// Manages the inbound (client → STT) and outbound (TTS → client) audio
/// queues for one session.
///
/// Inbound frames are forwarded to STT as they arrive and are not buffered
/// here; `inbound_len` exists for tests and diagnostics. The outbound side is
/// the one with barge-in semantics: a generation counter plus an
/// "agent speaking" flag the orchestrator consults before writing a
/// synthesized chunk to the client socket.
pub struct AudioBufferManager {
    generation: AtomicU64,
    output: Mutex<VecDeque<AudioChunk>>,
    speaking: AtomicBool,
}

impl AudioBufferManager {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            output: Mutex::new(VecDeque::new()),
            speaking: AtomicBool::new(false),
        }
    }

    /// Returns the current output generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wraps a synthesized chunk with the current generation for delivery.
    pub fn tag_chunk(&self, bytes: Bytes) -> AudioChunk {
        AudioChunk {
            bytes,
            enqueue_time: now_millis(),
            generation: self.generation(),
        }
    }

    /// Returns whether a chunk belongs to the current generation, i.e.
    /// whether it is still eligible for delivery to the client.
    pub fn is_current(&self, chunk: &AudioChunk) -> bool {
        chunk.generation == self.generation()
    }

    /// Bumps the output generation and clears the output buffer. Called as
    /// part of the barge-in procedure; anything already queued belongs to
    /// the prior generation and is dropped.
    pub fn bump_generation(&self) -> u64 {
        self.output.lock().clear();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

impl Default for AudioBufferManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_starts_at_generation_zero() {
        let mgr = AudioBufferManager::new();
        assert_eq!(mgr.generation(), 0);
    }

    #[test]
    fn barge_in_invalidates_prior_generation_chunks() {
        let mgr = AudioBufferManager::new();
        let stale = mgr.tag_chunk(Bytes::from_static(b"pre-bargein"));
        mgr.bump_generation();
        let fresh = mgr.tag_chunk(Bytes::from_static(b"post-bargein"));

        assert!(!mgr.is_current(&stale));
        assert!(mgr.is_current(&fresh));
        assert!(fresh.generation > stale.generation);
    }

    #[test]
    fn repeated_bumps_are_strictly_increasing() {
        let mgr = AudioBufferManager::new();
        let a = mgr.bump_generation();
        let b = mgr.bump_generation();
        assert!(b > a);
    }
}
