use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::router::IntentRouter;
use super::state::TurnState;
use crate::capabilities::{AgentType, Capability};

pub const EMPTY_RESPONSE: &str = "I couldn't generate a response. Could you rephrase or try again?";

/// Fixed-shape graph: router node, one node per registered capability and an
/// aggregator every capability node feeds.
pub struct DispatchGraph {
    router: IntentRouter,
    nodes: HashMap<AgentType, Arc<dyn Capability>>,
}

impl DispatchGraph {
    pub fn new(router: IntentRouter) -> Self {
        Self {
            router,
            nodes: HashMap::new(),
        }
    }

    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.nodes.insert(capability.agent_type(), capability);
        self
    }

    pub fn registered(&self) -> Vec<AgentType> {
        let mut agents: Vec<AgentType> = self.nodes.keys().copied().collect();
        agents.sort();
        agents
    }

    pub async fn run(&self, state: TurnState) -> TurnState {
        let state = self.route(state).await;
        let state = self.dispatch(state).await;
        Self::aggregate(state)
    }

    /// Router node: always leaves exactly one label in `agent_types`.
    pub async fn route(&self, mut state: TurnState) -> TurnState {
        let agent = self.router.route(&state.prompt, &state.history).await;
        state.agent_types = vec![agent];
        state.responses.clear();
        state
    }

    /// Runs every capability node named by the router. Each node writes exactly
    /// one entry into `responses`; a failing node records its error text.
    pub async fn dispatch(&self, mut state: TurnState) -> TurnState {
        if state.agent_types.is_empty() {
            state.agent_types.push(AgentType::General);
        }

        let input = state.capability_input();
        let runs = state.agent_types.iter().map(|agent| {
            let input = input.clone();
            let node = self.nodes.get(agent).cloned();
            let agent = *agent;
            async move {
                let text = match node {
                    Some(capability) => {
                        info!("▶️ Running {} capability", agent);
                        match capability.run(input).await {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("{} capability failed: {:#}", agent, e);
                                format!("[Error from {}]: {}", agent, e)
                            }
                        }
                    }
                    None => format!("[Error from {}]: capability is not registered", agent),
                };
                (agent, text)
            }
        });

        for (agent, text) in join_all(runs).await {
            state.responses.insert(agent, text);
        }
        state
    }

    /// Aggregator node: responses joined by a blank line, or the fallback sentinel.
    pub fn aggregate(mut state: TurnState) -> TurnState {
        let combined = state
            .responses
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");

        state.response = Some(if combined.trim().is_empty() {
            debug!("Aggregator received no usable output");
            EMPTY_RESPONSE.to_string()
        } else {
            combined
        });
        state
    }
}
