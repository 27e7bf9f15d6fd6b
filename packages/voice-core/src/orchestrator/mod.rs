//! Session orchestration: the pipeline that wires one client connection to
//! its STT/LLM/TTS providers, plus the barge-in procedure (spec §4.5, §9).

mod barge_in;
mod pipeline;

pub use pipeline::{ClientSink, Orchestrator};
