//! Feedback submission and aggregate analytics.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};
use validator::Validate;

use super::validated;
use crate::capabilities::AnswerMode;
use crate::conversation::{
    FeedbackAnalytics, FeedbackReceipt, FeedbackSubmission, FeedbackType, StoreError,
};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1, message = "session_id cannot be empty"))]
    pub session_id: String,
    #[validate(length(min = 1, message = "message_content cannot be empty"))]
    pub message_content: String,
    pub feedback_type: FeedbackType,
    #[validate(length(min = 1, message = "agent_type cannot be empty"))]
    pub agent_type: String,
    #[serde(default)]
    pub answer_mode: AnswerMode,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<FeedbackRequest> for FeedbackSubmission {
    fn from(req: FeedbackRequest) -> Self {
        FeedbackSubmission {
            session_id: req.session_id,
            message_content: req.message_content,
            feedback_type: req.feedback_type,
            agent_type: req.agent_type,
            answer_mode: req.answer_mode,
            timestamp: req.timestamp,
        }
    }
}

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::UnknownAgentType(_) => StatusCode::BAD_REQUEST,
        StoreError::SessionNotFound(_) | StoreError::MessageNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackReceipt>, Response> {
    let req = validated(req)?;
    info!(
        "Feedback ({}) for session {} on agent {}",
        req.feedback_type.as_str(),
        req.session_id,
        req.agent_type
    );

    match state.store.record_feedback(req.into()) {
        Ok(receipt) => Ok(Json(receipt)),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Failed to record feedback: {}", e);
            } else {
                warn!("Rejected feedback: {}", e);
            }
            Err((status, e.to_string()).into_response())
        }
    }
}

/// GET /feedback/analytics
pub async fn feedback_analytics(State(state): State<AppState>) -> Json<FeedbackAnalytics> {
    Json(state.store.feedback_analytics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_statuses() {
        assert_eq!(
            status_for(&StoreError::UnknownAgentType("pirate".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&StoreError::SessionNotFound("s1".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&StoreError::MessageNotFound("s1".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&StoreError::Sink(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_request_parses_lowercase_feedback_type() {
        let req: FeedbackRequest = serde_json::from_str(
            r#"{"session_id": "s1", "message_content": "answer", "feedback_type": "negative", "agent_type": "coding"}"#,
        )
        .unwrap();
        tokio_test::assert_ok!(req.validate());

        let submission: FeedbackSubmission = req.into();
        assert_eq!(submission.feedback_type, FeedbackType::Negative);
        assert_eq!(submission.answer_mode, AnswerMode::Specific);
        assert!(submission.timestamp.is_none());
    }

    #[test]
    fn test_blank_message_is_invalid() {
        let req: FeedbackRequest = serde_json::from_str(
            r#"{"session_id": "s1", "message_content": "", "feedback_type": "positive", "agent_type": "general"}"#,
        )
        .unwrap();
        assert!(validated(req).is_err());
    }
}
