//! Session lifecycle: resume, disconnect, queueing, and expiry.
//!
//! [`SessionManager`] maps durable [`SessionId`]s to transient
//! [`ConnectionId`]s. Both directions of the mapping are updated inside a
//! single critical section so a session is never observed bound to two
//! connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::Session;
use crate::domain::{ConnectionId, EventBus, ServerEvent, SessionId, SessionStats};

/// Tunables consumed by the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Horizon after which a detached session is garbage-collected.
    pub expiry: Duration,
    /// Per-session pending queue cap (oldest evicted on overflow).
    pub queue_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(24 * 3600),
            queue_cap: 100,
        }
    }
}

/// Result of a [`SessionManager::resume`] call, echoed to the client as
/// a `reconnect_response` envelope.
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    /// The bound session (fresh or restored).
    pub session_id: SessionId,
    /// `true` when an existing session was restored.
    pub is_reconnection: bool,
    /// Total resumes onto this session.
    pub reconnect_count: u32,
    /// Messages queued while disconnected, in enqueue order.
    pub queued_messages: Vec<Value>,
    /// Application state carried by the session.
    pub user_data: Option<Value>,
}

/// Maps durable session identities to transient connection identities.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    by_connection: RwLock<HashMap<ConnectionId, SessionId>>,
    config: SessionConfig,
    event_bus: EventBus,
    reconnections: AtomicU64,
}

impl SessionManager {
    /// Creates an empty session manager.
    #[must_use]
    pub fn new(config: SessionConfig, event_bus: EventBus) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_connection: RwLock::new(HashMap::new()),
            config,
            event_bus,
            reconnections: AtomicU64::new(0),
        }
    }

    /// Binds `connection_id` to a session.
    ///
    /// With a known, unexpired `session_id` the existing session is
    /// restored: any stale connection binding is released first, the
    /// reconnect count is bumped, and the pending queue is drained into
    /// the outcome. Otherwise (no id, unknown id, or expired id) a fresh
    /// session is created. `client_info` is client-supplied context,
    /// recorded for diagnostics only.
    pub async fn resume(
        &self,
        connection_id: ConnectionId,
        session_id: Option<SessionId>,
        client_info: Option<&Value>,
    ) -> ResumeOutcome {
        let mut sessions = self.sessions.write().await;
        let mut index = self.by_connection.write().await;

        if let Some(info) = client_info {
            tracing::debug!(connection_id = %connection_id, client_info = %info, "resume request");
        }

        // A connection holds at most one binding: detach whatever session
        // this connection was bound to before binding it anew. Without
        // this, a repeated resume on one connection would strand the prior
        // session as permanently "connected" and unsweepable.
        if let Some(prior) = index.remove(&connection_id) {
            if let Some(session) = sessions.get_mut(&prior) {
                session.connection_id = None;
                session.disconnected_at = Some(Utc::now());
            }
        }

        if let Some(sid) = session_id {
            let expired = sessions
                .get(&sid)
                .is_some_and(|s| s.is_expired(self.config.expiry, Utc::now()));
            if expired {
                sessions.remove(&sid);
            }

            if let Some(session) = sessions.get_mut(&sid) {
                // Atomically release the old binding before rebinding.
                if let Some(stale) = session.connection_id.take() {
                    index.remove(&stale);
                }
                session.connection_id = Some(connection_id);
                session.reconnect_count = session.reconnect_count.saturating_add(1);
                session.last_connected_at = Utc::now();
                session.disconnected_at = None;
                index.insert(connection_id, sid);

                let queued_messages = session.drain_queue();
                let outcome = ResumeOutcome {
                    session_id: sid,
                    is_reconnection: true,
                    reconnect_count: session.reconnect_count,
                    queued_messages,
                    user_data: session.user_data.clone(),
                };
                self.reconnections.fetch_add(1, Ordering::Relaxed);

                let _ = self.event_bus.publish(ServerEvent::SessionResumed {
                    session_id: sid,
                    connection_id,
                    reconnect_count: session.reconnect_count,
                    timestamp: Utc::now(),
                });
                tracing::info!(
                    session_id = %sid,
                    connection_id = %connection_id,
                    reconnect_count = session.reconnect_count,
                    replayed = outcome.queued_messages.len(),
                    "session resumed"
                );
                return outcome;
            }
        }

        let sid = SessionId::new();
        sessions.insert(sid, Session::new(sid, connection_id));
        index.insert(connection_id, sid);
        tracing::info!(session_id = %sid, connection_id = %connection_id, "session created");

        ResumeOutcome {
            session_id: sid,
            is_reconnection: false,
            reconnect_count: 0,
            queued_messages: Vec::new(),
            user_data: None,
        }
    }

    /// Detaches the session bound to `connection_id`, if any.
    ///
    /// The session itself survives with its user data and queue intact;
    /// only the connection binding is cleared. Returns the detached
    /// session id.
    pub async fn on_disconnect(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let mut sessions = self.sessions.write().await;
        let mut index = self.by_connection.write().await;

        let sid = index.remove(&connection_id)?;
        if let Some(session) = sessions.get_mut(&sid) {
            session.connection_id = None;
            session.disconnected_at = Some(Utc::now());
        }
        tracing::debug!(session_id = %sid, connection_id = %connection_id, "session detached");
        Some(sid)
    }

    /// Queues a message on the session bound to `connection_id`.
    ///
    /// Returns `false` without error when the connection has no bound
    /// session.
    pub async fn enqueue(&self, connection_id: ConnectionId, message: Value) -> bool {
        let sid = {
            let index = self.by_connection.read().await;
            index.get(&connection_id).copied()
        };
        match sid {
            Some(sid) => self.enqueue_for_session(sid, message).await,
            None => false,
        }
    }

    /// Queues a message directly on a session, bound or detached.
    ///
    /// This is the path used to accumulate messages for a disconnected
    /// client awaiting resume. Returns `false` for an unknown session.
    pub async fn enqueue_for_session(&self, session_id: SessionId, message: Value) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.enqueue(message, self.config.queue_cap);
                true
            }
            None => false,
        }
    }

    /// Replaces the application state carried by a session.
    ///
    /// Returns `false` for an unknown session.
    pub async fn set_user_data(&self, session_id: SessionId, user_data: Value) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.user_data = Some(user_data);
                true
            }
            None => false,
        }
    }

    /// Removes every detached session whose last activity exceeds
    /// `max_age`. This is the only path that permanently deletes session
    /// state. Returns the number of sessions removed.
    pub async fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.connection_id.is_some() || !s.is_expired(max_age, now));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired sessions swept");
        }
        removed
    }

    /// Returns the session id bound to a connection, if any.
    pub async fn session_of(&self, connection_id: ConnectionId) -> Option<SessionId> {
        self.by_connection.read().await.get(&connection_id).copied()
    }

    /// Number of sessions currently tracked (bound or detached).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` when no sessions are tracked.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Successful resumes since startup.
    #[must_use]
    pub fn reconnections(&self) -> u64 {
        self.reconnections.load(Ordering::Relaxed)
    }

    /// Snapshot for the periodic metrics report.
    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let connected = sessions.values().filter(|s| s.connection_id.is_some()).count();
        let queued_messages = sessions.values().map(Session::queue_len).sum();
        SessionStats {
            connected,
            detached: sessions.len() - connected,
            queued_messages,
        }
    }
}
