// agent-dispatch/crates/agent-dispatch/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_seconds: u64,
    pub upload_dir: PathBuf,
    pub data_dir: PathBuf,
    pub python_bin: PathBuf,
    /// `None` leaves sandbox runs unbounded; the transport layer is expected to bound them.
    pub sandbox_timeout_seconds: Option<u64>,
    pub search_api_url: String,
    pub search_api_key: Option<String>,
    pub rag_api_url: Option<String>,
    pub rag_api_key: Option<String>,
    pub qa_database_path: Option<PathBuf>,
    pub stream_delay_ms: u64,
    pub history_window: usize,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let python_bin = match get("PYTHON_BIN") {
            Some(bin) => PathBuf::from(bin),
            None => Self::auto_detect_python(),
        };

        let sandbox_timeout_seconds = match get("SANDBOX_TIMEOUT_SECONDS") {
            Some(raw) => Some(
                raw.parse()
                    .with_context(|| format!("invalid SANDBOX_TIMEOUT_SECONDS: {}", raw))?,
            ),
            None => None,
        };

        Ok(Self {
            api_host: get("API_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            api_port: parse_or(&get, "API_PORT", 8000)?,
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:8081".into()),
            llm_api_key: get("LLM_API_KEY"),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "local-llm".into()),
            llm_timeout_seconds: parse_or(&get, "LLM_TIMEOUT_SECONDS", 600)?,
            upload_dir: PathBuf::from(get("UPLOAD_DIR").unwrap_or_else(|| "./uploads".into())),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into())),
            python_bin,
            sandbox_timeout_seconds,
            search_api_url: get("SEARCH_API_URL")
                .unwrap_or_else(|| "https://api.tavily.com/search".into()),
            search_api_key: get("SEARCH_API_KEY"),
            rag_api_url: get("RAG_API_URL"),
            rag_api_key: get("RAG_API_KEY"),
            qa_database_path: get("QA_DATABASE_PATH").map(PathBuf::from),
            stream_delay_ms: parse_or(&get, "STREAM_DELAY_MS", 10)?,
            history_window: parse_or(&get, "HISTORY_WINDOW", 4)?,
            request_timeout_seconds: parse_or(&get, "REQUEST_TIMEOUT_SECONDS", 600)?,
        })
    }

    fn auto_detect_python() -> PathBuf {
        for candidate in ["python3", "python"] {
            if let Ok(path) = which::which(candidate) {
                info!("Auto-detected Python interpreter: {}", path.display());
                return path;
            }
        }
        warn!("No Python interpreter found on PATH, falling back to 'python3'");
        PathBuf::from("python3")
    }

    /// SQLite file backing the durable chat sink.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("conversations.db")
    }

    /// Flat JSON snapshot of the in-memory conversation maps.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("conversations.json")
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- LLM Backend: {} (model: {})", self.llm_base_url, self.llm_model);
        info!("- LLM Timeout: {}s", self.llm_timeout_seconds);
        info!("- Upload Dir: {}", self.upload_dir.display());
        info!("- Data Dir: {}", self.data_dir.display());
        info!("- Python: {}", self.python_bin.display());
        match self.sandbox_timeout_seconds {
            Some(secs) => info!("- Sandbox Timeout: {}s", secs),
            None => info!("- Sandbox Timeout: none"),
        }
        info!("- Search API: {}", self.search_api_url);
        info!(
            "- RAG API: {}",
            self.rag_api_url.as_deref().unwrap_or("not configured")
        );
        if let Some(path) = &self.qa_database_path {
            info!("- QA Database: {}", path.display());
        }
        info!("- Stream Delay: {}ms", self.stream_delay_ms);
        info!("- History Window: {} messages", self.history_window);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}
