use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{AgentType, Capability, CapabilityInput};
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};
use crate::memory::{self, Message};

/// Messages of prior conversation forwarded to the general assistant.
const HISTORY_LIMIT: usize = 20;

pub struct GeneralCapability {
    gateway: Arc<dyn CompletionGateway>,
}

impl GeneralCapability {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    fn system_prompt(input: &CapabilityInput) -> String {
        format!(
            "You are a helpful general-purpose assistant.\n\n\
             Current date and time: {}\n\n\
             RESPONSE FORMATTING:\n\
             - Use **bold** for key terms and *italics* for emphasis\n\
             - Use ## and ### headers to structure longer answers\n\
             - Use bullet points for lists\n\
             - Format numbers and data clearly\n\n\
             CONTENT GUIDELINES:\n\
             - Be helpful, accurate, and professional\n\
             - Reference earlier conversation context when relevant\n\
             - Never stop mid-sentence\n\n\
             {}{}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            input.answer_mode.tone_instruction(),
            input.guidance.as_deref().map(|g| format!("\n{}", g)).unwrap_or_default()
        )
    }
}

#[async_trait]
impl Capability for GeneralCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::General
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        info!("🧠 General assistant handling prompt ({} mode)", input.answer_mode.as_str());

        let mut messages = vec![Message::system(Self::system_prompt(&input))];
        messages.extend(memory::tail(&input.history, HISTORY_LIMIT).iter().cloned());
        messages.push(Message::user(input.prompt.clone()));

        match self
            .gateway
            .generate(CompletionRequest::new(messages, SamplingOptions::creative()))
            .await
        {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => {
                error!("General assistant error: {}", e);
                Ok(format!("I apologize, but I encountered an error: {}", e))
            }
        }
    }
}
