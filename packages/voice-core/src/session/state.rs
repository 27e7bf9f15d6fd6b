//! Session data model: history, state flags, and the `Session` record itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audio::AudioBufferManager;
use crate::session::id::SessionId;
use crate::utils::now_millis;

/// Role of a turn in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Bounded conversation history.
///
/// Enforces `history.len() <= max_history` by dropping the oldest turn on
/// overflow, never the newest (spec: §3 "Session" / §8 invariant).
#[derive(Debug)]
pub struct History {
    turns: VecDeque<Turn>,
    max_history: usize,
}

impl History {
    pub fn new(max_history: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_history.max(1)),
            max_history,
        }
    }

    /// Appends a turn, evicting the oldest entry if over the bound.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn::new(role, content));
        while self.turns.len() > self.max_history {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns a shallow copy of the history in `{role, content}` form,
    /// suitable to pass straight into an LLM adapter.
    pub fn formatted(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }
}

/// Per-session orchestrator-owned state flags.
///
/// Mutated only by the owning orchestrator; never shared across sessions
/// (spec: §5 "Shared resources").
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionState {
    pub active: bool,
    pub stt_connected: bool,
    pub tts_connected: bool,
    pub llm_streaming: bool,
    pub tts_streaming: bool,
    pub agent_speaking: bool,
}

/// A single live session: identity, history, state flags, and the audio
/// buffer manager. Providers are held by the orchestrator that owns this
/// session, not here, since the registry keeps only a non-owning reference.
pub struct Session {
    pub id: SessionId,
    pub created_at: u64,
    last_activity_at: AtomicU64,
    pub metadata: Mutex<HashMap<String, String>>,
    pub history: Mutex<History>,
    pub state: Mutex<SessionState>,
    pub buffers: AudioBufferManager,
}

impl Session {
    pub fn new(max_history: usize) -> Self {
        let now = now_millis();
        Self {
            id: SessionId::new(),
            created_at: now,
            last_activity_at: AtomicU64::new(now),
            metadata: Mutex::new(HashMap::new()),
            history: Mutex::new(History::new(max_history)),
            state: Mutex::new(SessionState::default()),
            buffers: AudioBufferManager::new(),
        }
    }

    /// Updates `last_activity_at` to now. Called on every inbound/outbound message.
    pub fn touch(&self) {
        self.last_activity_at.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_at(&self) -> u64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    /// Returns the client-provided `clientName`, if set, per spec §3 ("the
    /// only key the core reads").
    pub fn client_name(&self) -> Option<String> {
        self.metadata.lock().get("clientName").cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_drops_oldest_past_bound() {
        let mut history = History::new(2);
        history.append(Role::User, "one");
        history.append(Role::Assistant, "two");
        history.append(Role::User, "three");

        let formatted = history.formatted();
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0].content, "two");
        assert_eq!(formatted[1].content, "three");
    }

    #[test]
    fn session_touch_advances_last_activity() {
        let session = Session::new(15);
        let first = session.last_activity_at();
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.last_activity_at() >= first);
    }

    #[test]
    fn client_name_reads_only_that_key() {
        let session = Session::new(15);
        session
            .metadata
            .lock()
            .insert("clientName".to_string(), "Ivan".to_string());
        assert_eq!(session.client_name().as_deref(), Some("Ivan"));
    }
}
