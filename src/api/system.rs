//! System endpoints: health check, metrics snapshot, protocol config.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /metrics` — Current metrics snapshot.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "System",
    summary = "Metrics snapshot",
    description = "Returns the same snapshot the periodic metrics ticker publishes on the event bus.",
    responses(
        (status = 200, description = "Current gateway metrics"),
    )
)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.metrics_report().await;
    (StatusCode::OK, Json(report))
}

/// Client-advisory protocol parameters.
#[derive(Debug, Serialize, ToSchema)]
struct ProtocolConfig {
    heartbeat_interval_secs: u64,
    heartbeat_timeout_secs: u64,
    reconnect_max_attempts: u32,
    reconnect_backoff_ms: u64,
    max_message_bytes: usize,
}

/// `GET /config/protocol` — Protocol parameters for clients.
#[utoipa::path(
    get,
    path = "/config/protocol",
    tag = "System",
    summary = "Protocol parameters",
    description = "Returns the heartbeat cadence and reconnect/backoff parameters a well-behaved client should honor.",
    responses(
        (status = 200, description = "Protocol parameter set", body = ProtocolConfig),
    )
)]
pub async fn protocol_config_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    (
        StatusCode::OK,
        Json(ProtocolConfig {
            heartbeat_interval_secs: config.heartbeat_interval.as_secs(),
            heartbeat_timeout_secs: config.heartbeat_timeout.as_secs(),
            reconnect_max_attempts: config.reconnect_max_attempts,
            reconnect_backoff_ms: u64::try_from(config.reconnect_backoff.as_millis())
                .unwrap_or(u64::MAX),
            max_message_bytes: config.max_message_bytes,
        }),
    )
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/config/protocol", get(protocol_config_handler))
}
