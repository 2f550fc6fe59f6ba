//! Per-session agent state.
//!
//! `AgentSession` carries the working directory and the conversation
//! history the Coder seeds its messages from. History is mutated from two
//! places only — the orchestrator appending user turns and the Coder
//! appending assistant/tool turns — so all access goes through the lock.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::chat::ChatMessage;

pub struct AgentSession {
    cwd: PathBuf,
    history: Mutex<Vec<ChatMessage>>,
}

impl AgentSession {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Append one message to the conversation history.
    pub fn push_history(&self, msg: ChatMessage) {
        self.history.lock().push(msg);
    }

    /// Append several messages (used when seeding from a transcript).
    pub fn extend_history(&self, msgs: impl IntoIterator<Item = ChatMessage>) {
        self.history.lock().extend(msgs);
    }

    /// Snapshot the current history for building an LLM request.
    pub fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().clone()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}
