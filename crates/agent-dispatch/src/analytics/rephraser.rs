use std::sync::Arc;

use tracing::warn;

use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};

/// Converts raw printed output into one friendly sentence.
pub struct ResultRephraser {
    gateway: Arc<dyn CompletionGateway>,
}

impl ResultRephraser {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// `Err` carries the note shown in place of the sentence.
    pub async fn rephrase(&self, request: &str, output: &str) -> Result<String, String> {
        let prompt = format!(
            "You are a helpful assistant. The user asked:\n\"{request}\"\n\n\
             The Python code produced this output:\n{output}\n\n\
             Rephrase this as a concise, friendly sentence that directly answers the user's query.\n\
             Final answer:"
        );
        let sampling = SamplingOptions {
            temperature: 0.3,
            max_tokens: 200,
            top_p: 1.0,
        };

        match self
            .gateway
            .generate(CompletionRequest::from_prompt(prompt, sampling))
            .await
        {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => Err("(Could not rephrase the result: the model returned no text.)".to_string()),
            Err(e) => {
                warn!("Rephrase call failed: {}", e);
                Err(format!("(Could not rephrase the result due to a model error: {})", e))
            }
        }
    }
}
