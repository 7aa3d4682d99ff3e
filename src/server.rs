//! Composition root: wires the registry, heartbeat monitor, and session
//! manager together and owns startup/shutdown sequencing.
//!
//! [`RelayServer`] is an explicitly constructed context — no globals —
//! so tests can run several independent instances side by side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::routing::get;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::domain::{ConnectionRegistry, EventBus, ServerEvent};
use crate::error::{RelayError, close_code};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::Envelope;
use crate::session::SessionManager;
use crate::ws::handler::ws_handler;

/// The protocol server: transport listener plus the background tickers.
///
/// Startup: [`RelayServer::start`] binds the listener (the only startup
/// failure that propagates), then spawns the serve loop, the heartbeat
/// sweeper, the metrics ticker, and the session expiry sweeper.
///
/// Shutdown: [`RelayServer::shutdown`] stops accepting, cancels the
/// tickers, broadcasts a `server_shutdown` notice, waits the configured
/// grace period, and closes every remaining socket. The grace wait is
/// the one intentional timer-bound block in the design: bounded
/// shutdown latency is traded against a small chance of truncating
/// in-flight delivery.
#[derive(Debug)]
pub struct RelayServer {
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayServer {
    /// Builds all components from the given configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let registry = Arc::new(ConnectionRegistry::new(
            config.registry_config(),
            event_bus.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            config.session_config(),
            event_bus.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            config.heartbeat_config(),
            Arc::clone(&registry),
            event_bus.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            state: AppState {
                registry,
                sessions,
                heartbeat,
                event_bus,
                config: Arc::new(config),
                accepting: Arc::new(AtomicBool::new(true)),
            },
            shutdown_tx,
            serve_task: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the shared application state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Returns the session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.state.sessions
    }

    /// Returns the event bus for lifecycle events and forwarded messages.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.state.event_bus
    }

    /// Binds the listener and spawns the serve loop and all tickers.
    ///
    /// Returns the bound address (useful with a `:0` listen port in
    /// tests).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] when the listener cannot bind; this
    /// is the only startup failure that propagates to the caller.
    pub async fn start(&self) -> Result<SocketAddr, RelayError> {
        let listener = tokio::net::TcpListener::bind(self.state.config.listen_addr).await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .merge(api::build_router())
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let serve = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await;
            if let Err(err) = result {
                tracing::error!(%err, "serve loop exited with error");
            }
        });
        *self.serve_task.lock().await = Some(serve);

        let mut background = self.background_tasks.lock().await;
        background.push(self.state.heartbeat.spawn());
        background.push(spawn_metrics_ticker(self.state.clone()));
        background.push(spawn_session_sweeper(self.state.clone()));

        tracing::info!(%addr, "relay-gateway listening");
        Ok(addr)
    }

    /// Gracefully shuts the server down.
    ///
    /// Sequence: stop accepting upgrades, cancel the heartbeat/metrics/
    /// sweep tickers, broadcast the shutdown notice, wait the grace
    /// period, close every socket, and resolve the serve loop.
    pub async fn shutdown(&self) {
        self.state.accepting.store(false, Ordering::SeqCst);

        for handle in self.background_tasks.lock().await.drain(..) {
            handle.abort();
        }

        let notice = Envelope::server_shutdown("server shutting down");
        let notified = self.state.registry.broadcast(&notice, &[]).await;
        tracing::info!(
            notified,
            grace_secs = self.state.config.shutdown_grace.as_secs(),
            "shutdown notice broadcast"
        );

        tokio::time::sleep(self.state.config.shutdown_grace).await;
        self.state
            .registry
            .close_all(close_code::SHUTDOWN, "server shutdown")
            .await;

        let _ = self.shutdown_tx.send(true);
        if let Some(serve) = self.serve_task.lock().await.take() {
            let _ = serve.await;
        }
        tracing::info!("relay-gateway stopped");
    }
}

/// Spawns the periodic metrics snapshot ticker.
fn spawn_metrics_ticker(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.metrics_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = state.metrics_report().await;
            tracing::info!(
                active_connections = report.active_connections,
                messages_sent = report.messages_sent,
                messages_received = report.messages_received,
                reconnections = report.reconnections,
                rate_limit_violations = report.rate_limit_violations,
                queued_messages = report.queued_messages,
                "metrics snapshot"
            );
            let _ = state.event_bus.publish(ServerEvent::MetricsSnapshot {
                report,
                timestamp: Utc::now(),
            });
        }
    })
}

/// Spawns the periodic session expiry sweeper.
fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.session_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            state
                .sessions
                .sweep_expired(state.config.session_expiry)
                .await;
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown_grace: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let server = RelayServer::new(test_config());
        let addr = server.start().await.ok().unwrap_or_else(|| {
            panic!("start should succeed");
        });
        assert_ne!(addr.port(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn two_instances_run_independently() {
        let a = RelayServer::new(test_config());
        let b = RelayServer::new(test_config());
        let addr_a = a.start().await.ok();
        let addr_b = b.start().await.ok();
        assert!(addr_a.is_some());
        assert!(addr_b.is_some());
        assert_ne!(addr_a, addr_b);
        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_propagates() {
        let first = RelayServer::new(test_config());
        let addr = first.start().await.ok().unwrap_or_else(|| {
            panic!("start should succeed");
        });

        // Second bind to the same port must fail with a Bind error.
        let config = ServerConfig {
            listen_addr: addr,
            ..test_config()
        };
        let second = RelayServer::new(config);
        let result = second.start().await;
        assert!(matches!(result, Err(RelayError::Bind(_))));

        first.shutdown().await;
    }
}
