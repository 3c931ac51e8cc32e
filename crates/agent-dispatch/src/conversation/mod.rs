//! Multi-turn conversation state: sessions, turns, feedback and the engine
//! that runs a turn end to end.

pub mod engine;
pub mod error;
pub mod feedback;
pub mod snapshot;
pub mod store;
pub mod titles;

pub use engine::{ChatEngine, StopSignal, TurnRequest, GREETING_REPLY};
pub use error::StoreError;
pub use feedback::{FeedbackAnalytics, FeedbackEntry, FeedbackReceipt, FeedbackSubmission, FeedbackType};
pub use snapshot::SnapshotFile;
pub use store::{ConversationStats, ConversationStore, SessionMeta, SessionSummary, StoredMessage};
pub use titles::TitleSynthesizer;
