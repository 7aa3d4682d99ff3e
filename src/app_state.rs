//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::ServerConfig;
use crate::domain::{ConnectionRegistry, EventBus, MetricsReport};
use crate::heartbeat::HeartbeatMonitor;
use crate::session::SessionManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connection registry: admission, sends, rate limiting.
    pub registry: Arc<ConnectionRegistry>,
    /// Session manager: resume, queueing, expiry.
    pub sessions: Arc<SessionManager>,
    /// Heartbeat monitor: liveness tracking.
    pub heartbeat: Arc<HeartbeatMonitor>,
    /// Event bus for lifecycle events and forwarded messages.
    pub event_bus: EventBus,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
    /// Cleared during shutdown: new upgrades are rejected once false.
    pub accepting: Arc<AtomicBool>,
}

impl AppState {
    /// Assembles a point-in-time metrics report across all components.
    pub async fn metrics_report(&self) -> MetricsReport {
        let counters = self.registry.counters().await;
        let session_stats = self.sessions.stats().await;
        let heartbeat_stats = self.heartbeat.stats().await;
        MetricsReport {
            active_connections: counters.active_connections,
            total_connections: counters.total_connections,
            messages_sent: counters.messages_sent,
            messages_received: counters.messages_received,
            reconnections: self.sessions.reconnections(),
            rate_limit_violations: counters.rate_limit_violations,
            queued_messages: counters.queued_messages + session_stats.queued_messages,
            heartbeat_stats,
            session_stats,
        }
    }
}
