//! Completion gateway - the black-box text generation capability every
//! component talks to. Production code uses [`OpenAiGateway`]; tests script
//! replies through [`ScriptedGateway`].

pub mod openai;

pub use openai::OpenAiGateway;

use async_trait::async_trait;

use crate::memory::Message;

/// Sampling knobs forwarded to the completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl SamplingOptions {
    /// Greedy decoding with a hard output cap. Used for labels and yes/no answers.
    pub fn deterministic(max_tokens: u32) -> Self {
        Self {
            temperature: 0.0,
            max_tokens,
            top_p: 1.0,
        }
    }

    pub fn creative() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
        }
    }

    pub fn title() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 20,
            top_p: 1.0,
        }
    }
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self::creative()
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub sampling: SamplingOptions,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, sampling: SamplingOptions) -> Self {
        Self { messages, sampling }
    }

    /// Single user-turn request.
    pub fn from_prompt(prompt: impl Into<String>, sampling: SamplingOptions) -> Self {
        Self::new(vec![Message::user(prompt)], sampling)
    }

    /// System instruction followed by one user message.
    pub fn with_system(
        system: impl Into<String>,
        user: impl Into<String>,
        sampling: SamplingOptions,
    ) -> Self {
        Self::new(vec![Message::system(system), Message::user(user)], sampling)
    }
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Generate text for the request. May fail; latency is unbounded.
    async fn generate(&self, request: CompletionRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
pub use scripted::ScriptedGateway;
