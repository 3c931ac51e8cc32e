//! Specialist capabilities selected by the intent router.

pub mod analytics;
pub mod coding;
pub mod database;
pub mod document;
pub mod general;
pub mod websearch;

pub use analytics::AnalyticsCapability;
pub use coding::CodingCapability;
pub use database::DatabaseCapability;
pub use document::{DocumentCapability, HttpRagService, RagService};
pub use general::GeneralCapability;
pub use websearch::{SearchProvider, TavilySearch, WebsearchCapability};

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// Closed set of capabilities a turn can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    General,
    Coding,
    Analytics,
    Websearch,
    Document,
    Database,
}

impl AgentType {
    pub const ALL: [AgentType; 6] = [
        AgentType::General,
        AgentType::Coding,
        AgentType::Analytics,
        AgentType::Websearch,
        AgentType::Document,
        AgentType::Database,
    ];

    /// Case- and whitespace-insensitive label lookup.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|a| a.as_str() == label)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::General => "general",
            AgentType::Coding => "coding",
            AgentType::Analytics => "analytics",
            AgentType::Websearch => "websearch",
            AgentType::Document => "document",
            AgentType::Database => "database",
        }
    }

    /// Name of the row in the durable `agents` table.
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentType::General => "GeneralAssistant",
            AgentType::Coding => "CodingAgent",
            AgentType::Analytics => "AnalyticsAgent",
            AgentType::Websearch => "WebsearchAgent",
            AgentType::Document => "DocumentAgent",
            AgentType::Database => "DatabaseAgent",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbosity requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    #[default]
    Specific,
    Detailed,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Specific => "specific",
            AnswerMode::Detailed => "detailed",
        }
    }

    pub fn tone_instruction(&self) -> &'static str {
        match self {
            AnswerMode::Specific => "Be concise, fact-based, and avoid unnecessary detail.",
            AnswerMode::Detailed => {
                "Provide an elaborate answer. Include reasoning, examples, and comparisons if helpful."
            }
        }
    }
}

/// Everything a capability may read for one turn.
#[derive(Debug, Clone, Default)]
pub struct CapabilityInput {
    pub prompt: String,
    pub history: Vec<Message>,
    pub answer_mode: AnswerMode,
    pub chat_id: Option<String>,
    pub doc_id: Option<String>,
    /// Explicit upload reference for this turn, when the caller has one.
    pub file: Option<PathBuf>,
    /// Extra system instruction, e.g. after negative feedback in this session.
    pub guidance: Option<String>,
}

impl CapabilityInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Reply text for the turn. Expected failures are rendered into the text;
    /// `Err` is reserved for faults the graph reports generically.
    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String>;
}
