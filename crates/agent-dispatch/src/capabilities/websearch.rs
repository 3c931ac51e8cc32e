use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AgentType, Capability, CapabilityInput};
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};

pub const NO_RESULTS: &str = "No relevant search results found.";
pub const MAX_RESULTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default = "untitled")]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

fn untitled() -> String {
    "No Title".to_string()
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchHit>>;
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

pub struct TavilySearch {
    url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&TavilyRequest {
                api_key: &self.api_key,
                query,
                max_results: MAX_RESULTS,
            })
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search service returned an error")?;

        let body: TavilyResponse = response.json().await.context("invalid search response")?;
        Ok(body.results)
    }
}

/// "(i) title: content" lines, numbered from one.
pub fn format_snippets(hits: &[SearchHit]) -> Vec<String> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("({}) {}: {}", i + 1, hit.title, hit.content))
        .collect()
}

pub struct WebsearchCapability {
    gateway: Arc<dyn CompletionGateway>,
    search: Arc<dyn SearchProvider>,
}

impl WebsearchCapability {
    pub fn new(gateway: Arc<dyn CompletionGateway>, search: Arc<dyn SearchProvider>) -> Self {
        Self { gateway, search }
    }
}

#[async_trait]
impl Capability for WebsearchCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::Websearch
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        info!("🔍 Websearch handling query ({} mode)", input.answer_mode.as_str());

        let hits = match self.search.search(&input.prompt).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Search failed: {:#}", e);
                return Ok(NO_RESULTS.to_string());
            }
        };
        if hits.is_empty() {
            return Ok(NO_RESULTS.to_string());
        }

        let prompt = format!(
            "You are a websearch assistant with access to real-time web information.\n\
             Answer the following question using the given search snippets.\n\n\
             {}\n\n\
             Question: {}\n\n\
             Snippets:\n{}\n\n\
             Answer:",
            input.answer_mode.tone_instruction(),
            input.prompt,
            format_snippets(&hits).join("\n")
        );

        let answer = self
            .gateway
            .generate(CompletionRequest::from_prompt(prompt, SamplingOptions::creative()))
            .await?;
        Ok(answer.trim().to_string())
    }
}
