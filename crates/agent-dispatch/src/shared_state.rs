//! Process-wide application state.
//!
//! Everything a handler touches is built once at startup and shared through
//! `Arc`s: the dispatch graph and its capabilities, the conversation store and
//! the durable SQLite sink behind it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::analytics::{AnalyticsEngine, PythonSandbox, Sandbox, UploadArea};
use crate::capabilities::{
    AnalyticsCapability, CodingCapability, DatabaseCapability, DocumentCapability,
    GeneralCapability, HttpRagService, RagService, SearchProvider, TavilySearch,
    WebsearchCapability,
};
use crate::config::Config;
use crate::conversation::{ChatEngine, ConversationStore, SnapshotFile};
use crate::gateway::{CompletionGateway, OpenAiGateway};
use crate::graph::{DispatchGraph, IntentRouter};
use crate::memory_db::{ChatSink, SessionDatabase};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: ChatEngine,
    pub store: Arc<ConversationStore>,
    /// `None` when the SQLite sink could not be opened; the store then runs on
    /// its snapshot alone.
    pub database: Option<Arc<SessionDatabase>>,
}

impl AppState {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let gateway: Arc<dyn CompletionGateway> = Arc::new(OpenAiGateway::from_config(&config));
        let graph = Arc::new(Self::build_graph(&config, gateway.clone()));

        let database = match SessionDatabase::new(&config.database_path()) {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                warn!(
                    "Failed to open chat database at {}: {}. Continuing with snapshot only.",
                    config.database_path().display(),
                    e
                );
                None
            }
        };

        let sink = database.clone().map(|db| db as Arc<dyn ChatSink>);
        let store = Arc::new(ConversationStore::open(
            sink,
            SnapshotFile::at(config.snapshot_path()),
        ));

        let engine = ChatEngine::new(
            graph,
            store.clone(),
            gateway,
            Duration::from_millis(config.stream_delay_ms),
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            store,
            database,
        })
    }

    fn build_graph(config: &Config, gateway: Arc<dyn CompletionGateway>) -> DispatchGraph {
        let uploads = UploadArea::new(config.upload_dir.clone());
        let sandbox: Arc<dyn Sandbox> = Arc::new(PythonSandbox::from_config(config));
        let analytics = Arc::new(AnalyticsEngine::new(uploads.clone(), gateway.clone(), sandbox));

        if config.search_api_key.is_none() {
            warn!("SEARCH_API_KEY is not set; web search requests will be rejected upstream");
        }
        let search: Arc<dyn SearchProvider> = Arc::new(TavilySearch::new(
            config.search_api_url.clone(),
            config.search_api_key.clone().unwrap_or_default(),
        ));

        let rag = config.rag_api_url.as_ref().map(|url| {
            Arc::new(HttpRagService::new(url.clone(), config.rag_api_key.clone()))
                as Arc<dyn RagService>
        });

        let router = IntentRouter::new(gateway.clone(), config.history_window);
        let graph = DispatchGraph::new(router)
            .with_capability(Arc::new(GeneralCapability::new(gateway.clone())))
            .with_capability(Arc::new(CodingCapability::new(gateway.clone())))
            .with_capability(Arc::new(AnalyticsCapability::new(analytics)))
            .with_capability(Arc::new(WebsearchCapability::new(gateway.clone(), search)))
            .with_capability(Arc::new(DocumentCapability::new(gateway.clone(), rag, uploads)))
            .with_capability(Arc::new(DatabaseCapability::new(
                gateway,
                config.qa_database_path.clone(),
            )));

        info!("Dispatch graph ready with {} capabilities", graph.registered().len());
        graph
    }
}
