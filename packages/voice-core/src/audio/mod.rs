//! Per-session audio queues.

mod buffer;

pub use buffer::{AudioBufferManager, AudioChunk};
