//! Document QA over an external retrieval-augmented generation service.
//!
//! An inner router picks summarize, compare or query. Uploads come from the
//! shared upload area (or the turn's explicit file).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{AgentType, Capability, CapabilityInput};
use crate::analytics::UploadArea;
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};
use crate::memory::{self, Message};

pub const NOT_ENOUGH_PDFS: &str = "❌ Not enough PDF files to compare. Upload at least two.";
pub const NOT_CONFIGURED: &str = "Document service is not configured.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTask {
    Summarize,
    Compare,
    Query,
}

impl DocumentTask {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "summarize" => Some(Self::Summarize),
            "compare" => Some(Self::Compare),
            "query" => Some(Self::Query),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Compare => "compare",
            Self::Query => "query",
        }
    }
}

#[async_trait]
pub trait RagService: Send + Sync {
    /// Upload a local file; returns the server-side document id.
    async fn upload(&self, path: &Path, chat_id: &str) -> anyhow::Result<String>;
    async fn summarize(&self, doc_id: &str) -> anyhow::Result<String>;
    async fn query(&self, prompt: &str, doc_id: &str, chat_id: &str) -> anyhow::Result<String>;
    async fn compare(&self, doc_ids: &[String]) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    filenames: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: Value,
}

pub struct HttpRagService {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpRagService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http_client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RagService for HttpRagService {
    async fn upload(&self, path: &Path, chat_id: &str) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        let form = reqwest::multipart::Form::new()
            .part("files", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("chat_id", chat_id.to_string());

        let response = self.post("/upload").multipart(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("upload failed: {} - {}", status, body));
        }

        let uploaded: UploadResponse = response.json().await.context("invalid upload response")?;
        uploaded
            .filenames
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("invalid upload response: no filenames"))
    }

    async fn summarize(&self, doc_id: &str) -> anyhow::Result<String> {
        let results: Vec<Value> = self
            .post("/summarize")
            .form(&[("filenames", doc_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid summarize response")?;

        let first = results.first().ok_or_else(|| anyhow!("empty summarization result"))?;
        Ok(first
            .get("summary")
            .map(value_text)
            .unwrap_or_else(|| first.to_string()))
    }

    async fn query(&self, prompt: &str, doc_id: &str, chat_id: &str) -> anyhow::Result<String> {
        let result: QueryResponse = self
            .post("/query")
            .form(&[("prompt", prompt), ("doc_id", doc_id), ("chat_id", chat_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid query response")?;
        Ok(value_text(&result.result))
    }

    async fn compare(&self, doc_ids: &[String]) -> anyhow::Result<String> {
        let form = doc_ids.iter().fold(reqwest::multipart::Form::new(), |form, id| {
            form.text("filenames", id.clone())
        });
        let result: Value = self
            .post("/compare")
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid compare response")?;

        Ok(["comparison", "result"]
            .iter()
            .find_map(|key| result.get(*key))
            .map(value_text)
            .unwrap_or_else(|| result.to_string()))
    }
}

pub struct DocumentCapability {
    gateway: Arc<dyn CompletionGateway>,
    rag: Option<Arc<dyn RagService>>,
    uploads: UploadArea,
}

impl DocumentCapability {
    pub fn new(
        gateway: Arc<dyn CompletionGateway>,
        rag: Option<Arc<dyn RagService>>,
        uploads: UploadArea,
    ) -> Self {
        Self { gateway, rag, uploads }
    }

    /// Invalid labels and gateway failures both resolve to `Query`.
    pub async fn route(&self, prompt: &str, history: &[Message]) -> DocumentTask {
        let context = memory::render_transcript(memory::tail(history, 3));
        let system = format!(
            "You are a routing assistant inside the document agent.\n\
             Your job is to choose a task based on context:\n\
             - 'summarize' → summarize uploaded document\n\
             - 'compare' → compare two uploaded documents\n\
             - 'query' → answer questions based on uploaded document\n\
             Respond ONLY with one of: summarize, compare, query.\n\n\
             History:\n{}\n\nUser:\n{}",
            context, prompt
        );

        match self
            .gateway
            .generate(CompletionRequest::with_system(
                system,
                prompt,
                SamplingOptions::deterministic(5),
            ))
            .await
        {
            Ok(label) => DocumentTask::parse(&label).unwrap_or_else(|| {
                warn!("Invalid document task {:?}, defaulting to query", label.trim());
                DocumentTask::Query
            }),
            Err(e) => {
                error!("Document task routing failed: {}", e);
                DocumentTask::Query
            }
        }
    }

    async fn upload_current(
        &self,
        rag: &dyn RagService,
        input: &CapabilityInput,
        chat_id: &str,
    ) -> anyhow::Result<String> {
        let path = self
            .uploads
            .resolve(input.file.as_deref())
            .await
            .map_err(|e| anyhow!("{}", e))?;
        rag.upload(&path, chat_id).await
    }

    async fn summarize(&self, rag: &dyn RagService, input: &CapabilityInput, chat_id: &str) -> anyhow::Result<String> {
        let doc_id = self.upload_current(rag, input, chat_id).await?;
        let summary = rag.summarize(&doc_id).await?;
        info!("✅ Summarized '{}'", doc_id);
        Ok(summary)
    }

    async fn query(&self, rag: &dyn RagService, input: &CapabilityInput, chat_id: &str) -> anyhow::Result<String> {
        let doc_id = match &input.doc_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.upload_current(rag, input, chat_id).await?,
        };
        let answer = rag.query(&input.prompt, &doc_id, chat_id).await?;
        info!("✅ Query answered for '{}'", doc_id);
        Ok(answer)
    }

    async fn compare(&self, rag: &dyn RagService, chat_id: &str) -> anyhow::Result<String> {
        let pdfs = self.uploads.latest_n(2, Some(&["pdf"])).await?;
        if pdfs.len() < 2 {
            return Ok(NOT_ENOUGH_PDFS.to_string());
        }
        let mut doc_ids = Vec::with_capacity(pdfs.len());
        for path in &pdfs {
            doc_ids.push(rag.upload(path, chat_id).await?);
        }
        rag.compare(&doc_ids).await
    }
}

#[async_trait]
impl Capability for DocumentCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::Document
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        let Some(rag) = self.rag.as_deref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let task = self.route(&input.prompt, &input.history).await;
        info!("📄 Document task: {}", task.as_str());
        let chat_id = input
            .chat_id
            .clone()
            .unwrap_or_else(|| "default-session".to_string());

        let (label, result) = match task {
            DocumentTask::Summarize => ("Summarization", self.summarize(rag, &input, &chat_id).await),
            DocumentTask::Compare => ("Compare", self.compare(rag, &chat_id).await),
            DocumentTask::Query => ("Query", self.query(rag, &input, &chat_id).await),
        };

        Ok(result.unwrap_or_else(|e| {
            error!("{} task failed: {:#}", label, e);
            format!("{} error: {}", label, e)
        }))
    }
}
