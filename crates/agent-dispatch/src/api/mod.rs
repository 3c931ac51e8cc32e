// agent-dispatch/crates/agent-dispatch/src/api/mod.rs
//! HTTP handlers. Each one is a thin adapter over [`crate::conversation`].

pub mod chat_api;
pub mod conversation_api;
pub mod feedback_api;
pub mod health_api;

pub use chat_api::{chat_stream, ChatStreamRequest};
pub use conversation_api::{delete_session, get_session, get_session_stats, list_sessions};
pub use feedback_api::{feedback_analytics, submit_feedback, FeedbackRequest};
pub use health_api::{healthz, metrics};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use validator::Validate;

/// Reject a request body that fails its `validator` rules with 400.
pub(crate) fn validated<T: Validate>(body: T) -> Result<T, Response> {
    body.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request: {}", e)).into_response())?;
    Ok(body)
}
