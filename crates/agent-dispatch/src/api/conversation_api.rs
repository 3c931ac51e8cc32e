//! API endpoints for conversation/session management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::conversation::{ConversationStats, SessionSummary, StoredMessage};
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub session_id: String,
    pub title: String,
    pub message_count: usize,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

fn not_found(session_id: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Session not found: {}", session_id)).into_response()
}

/// GET /sessions, most recently updated first
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.store.list_sessions();
    info!("Listing {} sessions", sessions.len());
    Json(SessionsResponse { sessions })
}

/// GET /sessions/:id?limit=N
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SessionDetailResponse>, Response> {
    let meta = state.store.session(&session_id).ok_or_else(|| not_found(&session_id))?;
    let messages = state.store.history(&session_id, query.limit);

    Ok(Json(SessionDetailResponse {
        session_id,
        title: meta.title,
        message_count: meta.message_count,
        messages,
    }))
}

/// GET /sessions/:id/stats
pub async fn get_session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationStats>, Response> {
    if !state.store.contains_session(&session_id) {
        return Err(not_found(&session_id));
    }
    Ok(Json(state.store.conversation_stats(&session_id)))
}

/// DELETE /sessions/:id. Deleting an unknown session still succeeds.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let existed = state.store.delete_session(&session_id);
    info!("Deleted session {} (existed: {})", session_id, existed);
    Json(serde_json::json!({
        "success": true,
        "id": session_id,
        "existed": existed,
    }))
}
