//! HTTP gateway: observation ingest, state queries, and operator
//! endpoints.
//!
//! Request validation (400 for empty text/query), JSON responses, graceful
//! shutdown on Ctrl+C and SIGTERM.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

use stepwise_fallback::FallbackProcessor;
use stepwise_tracker::StateTracker;
use stepwise_types::{StateRecord, UnifiedResponse};

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct GatewayState {
    /// Observation ingest side.
    pub tracker: StateTracker,
    /// Query side.
    pub processor: Arc<FallbackProcessor>,
}

/// Request body for POST /ingest.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Observation text from the upstream vision model.
    pub text: String,
    /// Optional base64-encoded frame the observation was made from.
    #[serde(default)]
    pub frame_b64: Option<String>,
}

/// Response body for POST /ingest.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Whether the observation changed the tracked state.
    pub updated: bool,
}

/// Request body for POST /query.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// User's natural-language query.
    pub query: String,
}

async fn handle_ingest(
    State(state): State<GatewayState>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    if body.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "text must be non-empty".to_string()));
    }
    if let Some(frame_b64) = body.frame_b64.as_deref() {
        match BASE64.decode(frame_b64) {
            Ok(frame) if !frame.is_empty() => state.tracker.record_frame(frame).await,
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "ignoring undecodable frame_b64 on ingest");
            }
        }
    }
    let updated = state.tracker.process_observation(&body.text).await;
    Ok(Json(IngestResponse { updated }))
}

async fn handle_query(
    State(state): State<GatewayState>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<UnifiedResponse>, (StatusCode, String)> {
    if body.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "query must be non-empty".to_string(),
        ));
    }
    Ok(Json(state.processor.process_query(&body.query).await))
}

async fn handle_health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let health = state.processor.health().await;
    Json(json!({
        "status": if health.healthy { "healthy" } else { "degraded" },
        "vlm": health.vlm,
        "prompt": health.prompt,
        "timestamp": health.timestamp,
    }))
}

async fn handle_stats(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let summary = state.tracker.state_summary().await;
    let analysis = state.tracker.history_analysis().await;
    Json(json!({
        "tracker": summary,
        "history": analysis,
        "queries": state.processor.stats(),
        "example_queries": stepwise_query::example_queries(),
    }))
}

async fn handle_state(State(state): State<GatewayState>) -> Json<Option<StateRecord>> {
    Json(state.tracker.current_state().await)
}

/// Build the gateway router.
pub fn router(tracker: StateTracker, processor: Arc<FallbackProcessor>) -> Router {
    let state = GatewayState { tracker, processor };
    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/state", get(handle_state))
        .with_state(state)
}

/// Run the HTTP server on `bind_addr`. Graceful shutdown on Ctrl+C
/// (SIGINT) and SIGTERM (Unix); in-flight requests complete before exit.
pub async fn run_http(
    tracker: StateTracker,
    processor: Arc<FallbackProcessor>,
    bind_addr: &str,
) -> Result<()> {
    let app = router(tracker, processor);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("gateway listening on {bind_addr} (Ctrl+C/SIGTERM to stop)");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    }
}
