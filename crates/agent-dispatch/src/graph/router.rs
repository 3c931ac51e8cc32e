use std::sync::Arc;

use tracing::{error, info, warn};

use crate::capabilities::AgentType;
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};
use crate::memory::{self, Message};
use crate::metrics;

/// Tokens allowed for the label reply.
const LABEL_MAX_TOKENS: u32 = 5;

/// Classifies a prompt plus a short history window into one [`AgentType`].
/// Never fails: gateway errors and unknown labels both yield `General`.
pub struct IntentRouter {
    gateway: Arc<dyn CompletionGateway>,
    window: usize,
}

impl IntentRouter {
    pub fn new(gateway: Arc<dyn CompletionGateway>, window: usize) -> Self {
        Self { gateway, window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Lower-cased, trimmed label; anything outside the closed set is `General`.
    pub fn normalize(raw: &str) -> AgentType {
        AgentType::parse(raw).unwrap_or(AgentType::General)
    }

    pub fn instruction(history: &[Message]) -> String {
        format!(
            "You are an intelligent multi-agent router.\n\
             Given the conversation history and current user prompt, decide which ONE of the following agents should be activated:\n\
             - 'coding' for programming-related questions\n\
             - 'analytics' for data analysis, graphs, or file-based insights\n\
             - 'websearch' for real-time or factual queries\n\
             - 'document' for queries based on uploaded documents\n\
             - 'database' for questions that require querying a relational database\n\
             If none of these apply, respond with only 'general'.\n\n\
             Respond with only one agent type (no explanation, no punctuation):\n\n\
             Conversation History:\n{}",
            memory::render_transcript(history).trim()
        )
    }

    pub async fn route(&self, prompt: &str, history: &[Message]) -> AgentType {
        let context = memory::tail(history, self.window);
        let request = CompletionRequest::with_system(
            Self::instruction(context),
            prompt,
            SamplingOptions::deterministic(LABEL_MAX_TOKENS),
        );

        info!("🔀 Routing prompt with {} context message(s)", context.len());
        match self.gateway.generate(request).await {
            Ok(raw) => match AgentType::parse(&raw) {
                Some(agent) => {
                    info!("✅ Routed to agent: {}", agent);
                    agent
                }
                None => {
                    warn!("Router returned unknown label {:?}, using general", raw.trim());
                    metrics::inc_routing_fallback();
                    AgentType::General
                }
            },
            Err(e) => {
                error!("❌ Routing failed: {}", e);
                metrics::inc_routing_fallback();
                AgentType::General
            }
        }
    }
}
