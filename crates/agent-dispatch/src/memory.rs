// agent-dispatch/crates/agent-dispatch/src/memory.rs

use serde::{Deserialize, Serialize};

/// A single chat message exchanged with the completion gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Most recent `n` messages of a history, oldest first.
pub fn tail(history: &[Message], n: usize) -> &[Message] {
    let start = history.len().saturating_sub(n);
    &history[start..]
}

/// Render a history as `role: content` lines for inclusion in a prompt.
pub fn render_transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
