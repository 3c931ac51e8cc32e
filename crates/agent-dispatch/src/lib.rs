// agent-dispatch/crates/agent-dispatch/src/lib.rs

pub mod analytics;
pub mod capabilities;
pub mod config;
pub mod conversation;
pub mod gateway;
pub mod graph;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod shared_state;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use capabilities::{AgentType, AnswerMode, Capability, CapabilityInput};
pub use config::Config;
pub use conversation::{ChatEngine, ConversationStore, StopSignal, TurnRequest};
pub use gateway::{CompletionGateway, OpenAiGateway};
pub use graph::{DispatchGraph, IntentRouter, TurnState};
pub use memory::Message;
pub use shared_state::AppState;

#[cfg(feature = "cli")]
pub use server::run_server;
