use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::capabilities::{AgentType, AnswerMode, CapabilityInput};
use crate::memory::Message;

/// State threaded through the dispatch graph for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub prompt: String,
    pub history: Vec<Message>,
    pub answer_mode: AnswerMode,
    pub chat_id: Option<String>,
    pub doc_id: Option<String>,
    /// Explicit upload for this turn; the newest upload is used when empty.
    pub files: Vec<PathBuf>,
    pub guidance: Option<String>,
    /// Labels chosen by the router.
    pub agent_types: Vec<AgentType>,
    /// One entry per capability node that ran.
    pub responses: BTreeMap<AgentType, String>,
    /// Aggregated reply, set by the aggregator.
    pub response: Option<String>,
}

impl TurnState {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_answer_mode(mut self, answer_mode: AnswerMode) -> Self {
        self.answer_mode = answer_mode;
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// The agent credited with the reply: the first routed label.
    pub fn primary_agent(&self) -> AgentType {
        self.agent_types.first().copied().unwrap_or(AgentType::General)
    }

    pub fn capability_input(&self) -> CapabilityInput {
        CapabilityInput {
            prompt: self.prompt.clone(),
            history: self.history.clone(),
            answer_mode: self.answer_mode,
            chat_id: self.chat_id.clone(),
            doc_id: self.doc_id.clone(),
            file: self.files.first().cloned(),
            guidance: self.guidance.clone(),
        }
    }
}
