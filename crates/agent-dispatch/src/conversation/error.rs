use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Message not found in session {0}")]
    MessageNotFound(String),

    #[error("Durable sink error: {0}")]
    Sink(#[from] anyhow::Error),
}
