//! HTTP server startup.
//!
//! Builds the shared [`AppState`] once and mounts the API handlers on an axum
//! router. All conversation state lives in-process; the only outbound calls
//! are to the completion backend, search/RAG services and the Python sandbox.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{api, config::Config, shared_state::AppState};

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let state = AppState::build(cfg)?;
    let store = state.store.clone();
    let app = build_router(state.clone());

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = store.flush() {
        error!("Failed to flush conversation snapshot on shutdown: {}", e);
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    Router::new()
        .route("/chat/stream", post(api::chat_stream))
        .route("/feedback", post(api::submit_feedback))
        .route("/feedback/analytics", get(api::feedback_analytics))
        .route("/sessions", get(api::list_sessions))
        .route(
            "/sessions/:id",
            get(api::get_session).delete(api::delete_session),
        )
        .route("/sessions/:id/stats", get(api::get_session_stats))
        .route("/metrics", get(api::metrics))
        .route("/healthz", get(api::healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::capabilities::GeneralCapability;
    use crate::conversation::{ChatEngine, ConversationStore};
    use crate::gateway::{CompletionGateway, ScriptedGateway};
    use crate::graph::{DispatchGraph, IntentRouter};

    fn test_state(gateway: ScriptedGateway) -> AppState {
        let gateway: Arc<dyn CompletionGateway> = Arc::new(gateway);
        let graph = DispatchGraph::new(IntentRouter::new(gateway.clone(), 4))
            .with_capability(Arc::new(GeneralCapability::new(gateway.clone())));
        let store = Arc::new(ConversationStore::in_memory());
        let config = Config::from_lookup(|key| match key {
            "PYTHON_BIN" => Some("python3".to_string()),
            _ => None,
        })
        .unwrap();

        AppState {
            config: Arc::new(config),
            engine: ChatEngine::new(Arc::new(graph), store.clone(), gateway, Duration::ZERO),
            store,
            database: None,
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // ===== Health & metrics =====

    #[tokio::test]
    async fn test_healthz_reports_ok() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["sink"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        crate::metrics::init_metrics();
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // ===== Chat stream =====

    #[tokio::test]
    async fn test_chat_stream_ends_with_end_event() {
        let state = test_state(ScriptedGateway::new());
        let store = state.store.clone();
        let app = build_router(state);

        let response = app
            .oneshot(post_json("/chat/stream", r#"{"prompt": "hello", "session_id": "s1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        assert!(body.contains("Hello!"));
        assert!(body.trim_end().ends_with("data: [END]"));
        assert_eq!(store.message_count("s1"), 2);
    }

    #[tokio::test]
    async fn test_chat_stream_rejects_blank_prompt() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(post_json("/chat/stream", r#"{"prompt": "", "session_id": "s1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ===== Sessions & feedback =====

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(Request::get("/sessions/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let request = || {
            Request::delete("/sessions/missing")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_feedback_on_unknown_session_is_not_found() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(post_json(
                "/feedback",
                r#"{"session_id": "nope", "message_content": "x", "feedback_type": "positive", "agent_type": "general"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feedback_analytics_starts_empty() {
        let app = build_router(test_state(ScriptedGateway::new()));
        let response = app
            .oneshot(Request::get("/feedback/analytics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["total_feedback"], 0);
        assert_eq!(body["improvement_suggestions"][0], "No feedback data available yet.");
    }
}
