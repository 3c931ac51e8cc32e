use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::shared_state::AppState;

/// GET /metrics in the Prometheus text exposition format.
pub async fn metrics() -> Response {
    match crate::metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Metrics error: {}", e)).into_response()
        }
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let sink = match &state.database {
        Some(db) => match db.stats() {
            Ok(stats) => json!(stats),
            Err(e) => {
                warn!("Chat database health check failed: {}", e);
                json!({ "error": e.to_string() })
            }
        },
        None => Value::Null,
    };

    Json(json!({
        "status": "ok",
        "sessions": state.store.list_sessions().len(),
        "sink": sink,
    }))
}
