//! The barge-in procedure (spec §4.5, §9).
//!
//! Must run atomically with respect to the reply procedure's fragment loop:
//! once this returns, no chunk from the interrupted reply may reach the
//! client, and the interrupted turn must not land in history. The ordering
//! below — clear `pending_reply` before bumping the generation counter is
//! irrelevant to correctness here since both happen under the same state
//! lock — matters only in that `pending_reply` is cleared before the reply
//! loop can observe the cancellation and decide whether to append history.

use crate::orchestrator::pipeline::Orchestrator;
use crate::wire::EventKind;

impl Orchestrator {
    /// Runs the barge-in procedure. Safe to call from IDLE (a no-op beyond
    /// the generation bump, since nothing is in flight to cancel).
    pub(crate) async fn barge_in(&self) {
        self.tts.cancel();
        self.llm.cancel();

        let new_generation = self.session.buffers.bump_generation();
        self.session.buffers.set_speaking(false);

        {
            let mut pending = self.pending_reply.lock();
            if self.retain_interrupted_turns {
                if let Some(text) = pending.take() {
                    if !text.is_empty() {
                        self.session.history.lock().append(crate::session::Role::Assistant, text);
                    }
                }
            } else {
                *pending = None;
            }
        }

        {
            let mut state = self.session.state.lock();
            state.agent_speaking = false;
            state.llm_streaming = false;
            state.tts_streaming = false;
        }

        log::info!(
            "[Orchestrator] barge-in for session {}: generation now {}",
            self.session.id,
            new_generation
        );

        self.send_event(EventKind::InterruptionProcessed, serde_json::json!({}))
            .await;
    }
}
