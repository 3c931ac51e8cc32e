//! Streaming chat endpoint.
//!
//! Flow: client POST → validation → ChatEngine turn stream → SSE frames, closed
//! by a final `[END]` event. Dropping the response (client disconnect) raises
//! the turn's stop signal so a half-streamed turn is never persisted.

use std::convert::Infallible;
use std::path::PathBuf;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info};
use validator::Validate;

use super::validated;
use crate::capabilities::AnswerMode;
use crate::conversation::{StopSignal, TurnRequest};
use crate::shared_state::AppState;

pub const END_EVENT: &str = "[END]";

#[derive(Debug, Deserialize, Validate)]
pub struct ChatStreamRequest {
    #[validate(length(min = 1, message = "prompt cannot be empty"))]
    pub prompt: String,
    #[validate(length(min = 1, message = "session_id cannot be empty"))]
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

impl From<ChatStreamRequest> for TurnRequest {
    fn from(req: ChatStreamRequest) -> Self {
        TurnRequest {
            prompt: req.prompt,
            session_id: req.session_id,
            files: req.files,
            answer_mode: req.answer_mode,
            user_id: req.user_id,
            doc_id: req.doc_id,
            user_msg_id: req.user_msg_id,
            assistant_msg_id: req.assistant_msg_id,
        }
    }
}

/// Raises the stop signal unless the stream ran to completion.
struct StopOnDrop {
    signal: StopSignal,
    armed: bool,
}

impl StopOnDrop {
    fn new(signal: StopSignal) -> Self {
        Self { signal, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("Chat stream dropped before completion, stopping turn");
            self.signal.stop();
        }
    }
}

/// POST /chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatStreamRequest>,
) -> Response {
    let req = match validated(req) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    info!("Chat turn for session: {}", req.session_id);

    let stop = StopSignal::new();
    let mut guard = StopOnDrop::new(stop.clone());
    let turn = state.engine.chat(req.into(), stop);

    let events = async_stream::stream! {
        futures_util::pin_mut!(turn);
        while let Some(chunk) = turn.next().await {
            yield Ok::<_, Infallible>(Event::default().data(chunk));
        }
        guard.disarm();
        yield Ok(Event::default().data(END_EVENT));
    };

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
        .into_response()
}
