//! Check-in HTTP API
//!
//! Axum server for the location ingest endpoint. Each endpoint has a thin
//! axum handler that delegates to an inner function, so the logic can be
//! exercised without axum dispatch.
//!
//! Endpoints:
//! - POST /api/location: validate and persist a check-in (201 / 400 / 500)
//! - POST /api/mirror: validate and echo the normalized document, no write
//! - POST /api/insight: summary and fun fact for a point, never fails
//! - GET /health: storage backend status
//! - GET /version: server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use checkin_core::wire::{IngestCreated, IngestFailed, IngestRejected};
use checkin_core::{CheckinConfig, InsightBackend, LocationStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::ingest::{self, IngestError};

/// Shared state for all HTTP handlers. Built once at startup and owned by
/// the router for the life of the process.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn LocationStore>,
    pub insight: Arc<dyn InsightBackend>,
    pub config: CheckinConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/location", post(location_handler))
        .route("/api/mirror", post(mirror_handler))
        .route("/api/insight", post(insight_handler))
        .with_state(state)
}

/// Serve on the configured address until the shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(backend = state.store.name(), "Check-in API listening on http://{}", addr);

    serve(listener, state, async move {
        let _ = shutdown.recv().await;
        tracing::info!("HTTP server shutting down...");
    })
    .await
}

/// Serve on an already-bound listener. Split out so tests can bind port 0.
pub async fn serve<F>(listener: TcpListener, state: Arc<HttpState>, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(store: &dyn LocationStore) -> (StatusCode, Value) {
    match store.health().await {
        Ok(storage) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": storage,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "backend": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "checkin/1",
    })
}

pub async fn location_inner(
    store: &dyn LocationStore,
    config: &CheckinConfig,
    payload: Value,
    user_agent: Option<&str>,
) -> (StatusCode, Value) {
    match ingest::ingest(store, &payload, user_agent, &config.ingest).await {
        Ok(id) => (StatusCode::CREATED, json!(IngestCreated::new(id.to_string()))),
        Err(e) => error_body(e),
    }
}

pub fn mirror_inner(config: &CheckinConfig, payload: Value) -> (StatusCode, Value) {
    match ingest::validate(&payload, &config.ingest) {
        Ok(location) => (
            StatusCode::OK,
            json!({
                "success": true,
                "received": location,
            }),
        ),
        Err(e) => error_body(e),
    }
}

pub async fn insight_inner(insight: &dyn InsightBackend, payload: Value) -> (StatusCode, Value) {
    let pair = payload["coordinates"]
        .as_array()
        .filter(|c| c.len() == 2)
        .and_then(|c| Some((c[0].as_f64()?, c[1].as_f64()?)));

    let Some((lng, lat)) = pair else {
        return (
            StatusCode::BAD_REQUEST,
            json!(IngestRejected {
                error: "coordinates must be an array of two numbers".to_string(),
            }),
        );
    };

    match insight.insight(lat, lng).await {
        Ok(i) => (StatusCode::OK, json!(i)),
        Err(e) => {
            // Backends are expected to degrade on their own; this is the last stop.
            tracing::warn!(error = %e, backend = insight.name(), "Insight backend failed");
            (StatusCode::OK, json!(checkin_core::LocationInsight::canned()))
        }
    }
}

/// Body-level failures (bad JSON, wrong content type, empty body) answer with
/// the same `400 { error }` shape as a validation failure.
pub fn rejection_body(rejection: &JsonRejection) -> (StatusCode, Value) {
    tracing::warn!(error = %rejection.body_text(), "Rejected unreadable request body");
    (
        StatusCode::BAD_REQUEST,
        json!(IngestRejected {
            error: rejection.body_text(),
        }),
    )
}

fn error_body(e: IngestError) -> (StatusCode, Value) {
    let status = e.status_code();
    let body = match &e {
        IngestError::Validation(msg) => json!(IngestRejected { error: msg.clone() }),
        IngestError::Storage(_) => json!(IngestFailed::new(e.to_string())),
    };
    (status, body)
}

// ============================================================================
// Axum handler wrappers (thin, they delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn location_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(payload)) => {
            let user_agent = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok());
            location_inner(state.store.as_ref(), &state.config, payload, user_agent).await
        }
        Err(rejection) => rejection_body(&rejection),
    };
    (status, Json(body))
}

pub async fn mirror_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(payload)) => mirror_inner(&state.config, payload),
        Err(rejection) => rejection_body(&rejection),
    };
    (status, Json(body))
}

pub async fn insight_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(payload)) => insight_inner(state.insight.as_ref(), payload).await,
        Err(rejection) => rejection_body(&rejection),
    };
    (status, Json(body))
}
