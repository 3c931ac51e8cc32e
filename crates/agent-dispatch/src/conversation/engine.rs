//! Drives one turn: session bootstrap, dispatch, paced streaming and persistence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::store::{CompletedTurn, ConversationStore};
use super::titles::TitleSynthesizer;
use crate::capabilities::{AgentType, AnswerMode};
use crate::gateway::CompletionGateway;
use crate::graph::{DispatchGraph, TurnState, EMPTY_RESPONSE};
use crate::metrics;

pub const GREETING_REPLY: &str = "👋 Hello! I'm your assistant. Ask me anything!";

const GREETINGS: [&str; 7] = [
    "hi",
    "hello",
    "hey",
    "how are you",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Cooperative cancellation flag shared between a transport and a turn.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub prompt: String,
    pub session_id: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub answer_mode: AnswerMode,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub user_msg_id: Option<String>,
    #[serde(default)]
    pub assistant_msg_id: Option<String>,
}

pub fn is_greeting(prompt: &str) -> bool {
    let cleaned = prompt.trim().to_lowercase();
    let cleaned = cleaned.trim_end_matches(['!', '?', '.']);
    GREETINGS.contains(&cleaned)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    Words,
    Lines,
}

fn chunks(text: &str, pacing: Pacing) -> Vec<String> {
    match pacing {
        Pacing::Words => text.split_whitespace().map(|w| format!("{} ", w)).collect(),
        Pacing::Lines => text.lines().map(|l| format!("{}\n", l)).collect(),
    }
}

/// Keeps the active-turn gauge and duration histogram honest even when the
/// stream is dropped mid-turn.
struct TurnTimer(Instant);

impl TurnTimer {
    fn start() -> Self {
        metrics::inc_active_turns();
        Self(Instant::now())
    }
}

impl Drop for TurnTimer {
    fn drop(&mut self) {
        metrics::dec_active_turns();
        metrics::observe_turn_duration(self.0.elapsed().as_secs_f64());
    }
}

#[derive(Clone)]
pub struct ChatEngine {
    graph: Arc<DispatchGraph>,
    store: Arc<ConversationStore>,
    titles: Arc<TitleSynthesizer>,
    stream_delay: Duration,
}

impl ChatEngine {
    pub fn new(
        graph: Arc<DispatchGraph>,
        store: Arc<ConversationStore>,
        gateway: Arc<dyn CompletionGateway>,
        stream_delay: Duration,
    ) -> Self {
        Self {
            graph,
            store,
            titles: Arc::new(TitleSynthesizer::new(gateway)),
            stream_delay,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    async fn answer(&self, request: &TurnRequest) -> (String, AgentType, Pacing, &'static str) {
        if is_greeting(&request.prompt) {
            return (GREETING_REPLY.to_string(), AgentType::General, Pacing::Words, "greeting");
        }

        let mut state = TurnState::new(request.prompt.clone())
            .with_history(self.store.history_messages(&request.session_id))
            .with_answer_mode(request.answer_mode)
            .with_chat_id(request.session_id.clone())
            .with_files(request.files.clone());
        state.doc_id = request.doc_id.clone();
        state.guidance = self.store.feedback_guidance(&request.session_id);

        let graph = self.graph.clone();
        match tokio::spawn(async move { graph.run(state).await }).await {
            Ok(done) => {
                let agent = done.primary_agent();
                let reply = done
                    .response
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_RESPONSE.to_string());
                (reply, agent, Pacing::Lines, "completed")
            }
            Err(e) => {
                error!("Dispatch graph failed: {}", e);
                (
                    format!("⚠️ Something went wrong: {}", e),
                    AgentType::General,
                    Pacing::Words,
                    "error",
                )
            }
        }
    }

    /// Stream the reply for one turn. Setting `stop` ends the stream at the
    /// next chunk boundary and skips persistence.
    pub fn chat(&self, request: TurnRequest, stop: StopSignal) -> impl Stream<Item = String> + Send + 'static {
        let engine = self.clone();

        async_stream::stream! {
            let _timer = TurnTimer::start();

            if !engine.store.contains_session(&request.session_id) {
                let title = engine.titles.title(&request.prompt).await;
                engine.store.ensure_session(&request.session_id, request.user_id, &title);
            }

            let (reply, agent, pacing, outcome) = engine.answer(&request).await;

            for chunk in chunks(&reply, pacing) {
                if stop.is_stopped() {
                    break;
                }
                yield chunk;
                if !engine.stream_delay.is_zero() {
                    tokio::time::sleep(engine.stream_delay).await;
                }
            }

            if stop.is_stopped() {
                info!("Turn for session {} cancelled; not persisted", request.session_id);
                metrics::inc_turn(agent.as_str(), "cancelled");
            } else {
                let persisted = engine.store.append_turn(
                    &request.session_id,
                    CompletedTurn {
                        user_msg_id: request.user_msg_id.clone(),
                        assistant_msg_id: request.assistant_msg_id.clone(),
                        user_content: request.prompt.clone(),
                        assistant_content: reply,
                        agent,
                    },
                );
                if let Err(e) = persisted {
                    warn!("Turn for session {} not stored: {}", request.session_id, e);
                }
                metrics::inc_turn(agent.as_str(), outcome);
            }
        }
    }
}
