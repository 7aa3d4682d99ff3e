//! Concurrent connection storage with per-connection fine-grained locking.
//!
//! [`ConnectionRegistry`] owns the set of live connections, the
//! user→connection index, per-connection outbound queues, the embedded
//! rate limiters, and the temporary origin-ban table. It stores entries
//! in a `HashMap` where each entry is individually protected by a
//! [`tokio::sync::RwLock`], so operations on different connections run
//! concurrently while operations on the same connection are serialized.
//!
//! All cross-component access goes through the methods here — the
//! heartbeat monitor and session manager never touch the maps directly.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

use super::connection::{ConnectionEntry, ConnectionInfo, OutboundFrame};
use super::{ConnectionId, EventBus, ServerEvent};
use crate::error::{RelayError, close_code};
use crate::protocol::Envelope;

/// Tunables consumed by the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum simultaneous connections before admission rejects.
    pub max_connections: usize,
    /// Per-connection outbound queue cap (oldest evicted on overflow).
    pub queue_cap: usize,
    /// Master switch for the fixed-window rate limiter.
    pub rate_limit_enabled: bool,
    /// Rate-limit window size.
    pub rate_window: Duration,
    /// Requests allowed per window.
    pub rate_max_requests: u32,
    /// How long a violating origin stays banned.
    pub ban_duration: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            queue_cap: 100,
            rate_limit_enabled: true,
            rate_window: Duration::from_secs(60),
            rate_max_requests: 100,
            ban_duration: Duration::from_secs(300),
        }
    }
}

/// Central store for all live connections.
///
/// # Concurrency
///
/// - Multiple tasks may read different connections concurrently.
/// - Operations on the same connection are serialized by its inner lock.
/// - Counters are atomics and never require a map lock.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<RwLock<ConnectionEntry>>>>,
    user_index: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    banned: RwLock<HashMap<IpAddr, Instant>>,
    config: RegistryConfig,
    event_bus: EventBus,
    total_connections: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    rate_limit_violations: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig, event_bus: EventBus) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            user_index: RwLock::new(HashMap::new()),
            banned: RwLock::new(HashMap::new()),
            config,
            event_bus,
            total_connections: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            rate_limit_violations: AtomicU64::new(0),
        }
    }

    /// Runs admission checks for a connecting origin without allocating
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::OriginBanned`] while the origin's ban is
    /// active, or [`RelayError::CapacityExceeded`] when the registry is
    /// full. Expired bans are purged here.
    pub async fn admit(&self, addr: SocketAddr) -> Result<(), RelayError> {
        let ip = addr.ip();
        {
            let mut banned = self.banned.write().await;
            if let Some(until) = banned.get(&ip).copied() {
                if Instant::now() < until {
                    return Err(RelayError::OriginBanned(ip));
                }
                banned.remove(&ip);
            }
        }
        if self.connections.read().await.len() >= self.config.max_connections {
            return Err(RelayError::CapacityExceeded(self.config.max_connections));
        }
        Ok(())
    }

    /// Admits and registers a new connection.
    ///
    /// Allocates the registry entry, rate-limiter state, and an empty
    /// outbound queue, then emits [`ServerEvent::ConnectionAdded`].
    ///
    /// # Errors
    ///
    /// Propagates the admission errors of [`Self::admit`].
    pub async fn add_connection(
        &self,
        addr: SocketAddr,
        user_agent: Option<String>,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Result<ConnectionId, RelayError> {
        self.admit(addr).await?;

        let id = ConnectionId::new();
        let entry = ConnectionEntry::new(
            id,
            addr,
            user_agent,
            sender,
            self.config.rate_window,
            self.config.rate_max_requests,
        );
        self.connections
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(entry)));
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        let _ = self.event_bus.publish(ServerEvent::ConnectionAdded {
            connection_id: id,
            remote_addr: addr,
            timestamp: Utc::now(),
        });
        tracing::info!(connection_id = %id, remote_addr = %addr, "connection added");
        Ok(id)
    }

    /// Removes a connection and cleans the user index.
    ///
    /// Idempotent: removing an absent id is a no-op. Dropping the entry
    /// drops its outbound channel sender, which unblocks the socket task.
    pub async fn remove_connection(&self, id: ConnectionId) {
        let removed = self.connections.write().await.remove(&id);
        let Some(entry_lock) = removed else {
            return;
        };
        let user_id = entry_lock.read().await.user_id.clone();
        if let Some(user_id) = user_id {
            let mut index = self.user_index.write().await;
            if let Some(set) = index.get_mut(&user_id) {
                set.remove(&id);
                if set.is_empty() {
                    index.remove(&user_id);
                }
            }
        }

        let _ = self.event_bus.publish(ServerEvent::ConnectionRemoved {
            connection_id: id,
            timestamp: Utc::now(),
        });
        tracing::debug!(connection_id = %id, "connection removed");
    }

    /// Marks a connection authenticated and indexes it under `user_id`.
    ///
    /// A user may hold multiple simultaneous connections. Returns `false`
    /// if the connection id is unknown.
    pub async fn authenticate(
        &self,
        id: ConnectionId,
        user_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> bool {
        let Some(entry_lock) = self.connections.read().await.get(&id).cloned() else {
            return false;
        };
        {
            let mut entry = entry_lock.write().await;
            entry.is_authenticated = true;
            entry.user_id = Some(user_id.to_string());
            entry.metadata = metadata;
        }
        self.user_index
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(id);

        let _ = self.event_bus.publish(ServerEvent::ConnectionAuthenticated {
            connection_id: id,
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(connection_id = %id, user_id, "connection authenticated");
        true
    }

    /// Sends a serialized envelope to one connection.
    ///
    /// If the socket is not currently writable the message is appended to
    /// the connection's bounded pending queue instead of being dropped,
    /// and the call reports `false`. Success stamps activity and counts
    /// toward the outbound metric.
    pub async fn send(&self, id: ConnectionId, wire: String) -> bool {
        let Some(entry_lock) = self.connections.read().await.get(&id).cloned() else {
            return false;
        };
        let mut entry = entry_lock.write().await;
        match entry.sender.try_send(OutboundFrame::Text(wire)) {
            Ok(()) => {
                entry.last_activity = Instant::now();
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                let wire = match err {
                    mpsc::error::TrySendError::Full(OutboundFrame::Text(w))
                    | mpsc::error::TrySendError::Closed(OutboundFrame::Text(w)) => w,
                    mpsc::error::TrySendError::Full(OutboundFrame::Close(..))
                    | mpsc::error::TrySendError::Closed(OutboundFrame::Close(..)) => {
                        return false;
                    }
                };
                entry.push_pending(wire, self.config.queue_cap);
                false
            }
        }
    }

    /// Serializes and sends an envelope to one connection.
    ///
    /// Serialization failures report `false` rather than erroring — the
    /// caller cannot do anything about a bad system envelope.
    pub async fn send_envelope(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        match envelope.serialize() {
            Ok(wire) => self.send(id, wire).await,
            Err(err) => {
                tracing::error!(connection_id = %id, %err, "dropping unserializable envelope");
                false
            }
        }
    }

    /// Sends an envelope to every connection bound to `user_id`,
    /// returning the number of successful deliveries.
    pub async fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> usize {
        let ids: Vec<ConnectionId> = self
            .user_index
            .read()
            .await
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for id in ids {
            if self.send_envelope(id, envelope).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcasts an envelope to every connection except `exclude`,
    /// returning the number of successful deliveries.
    ///
    /// Per-recipient delivery stays in order; no ordering is guaranteed
    /// across recipients.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: &[ConnectionId]) -> usize {
        let ids: Vec<ConnectionId> = self.connections.read().await.keys().copied().collect();
        let mut delivered = 0;
        for id in ids {
            if exclude.contains(&id) {
                continue;
            }
            if self.send_envelope(id, envelope).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Applies rate limiting and activity accounting to one inbound
    /// message.
    ///
    /// On a rate-limit violation the origin IP is banned for the
    /// configured duration, the connection is force-closed with
    /// [`close_code::RATE_LIMITED`], and the message is not forwarded
    /// (returns `false`). Unknown ids also return `false`.
    pub async fn handle_inbound(&self, id: ConnectionId) -> bool {
        let Some(entry_lock) = self.connections.read().await.get(&id).cloned() else {
            return false;
        };

        let violation_addr = {
            let mut entry = entry_lock.write().await;
            if self.config.rate_limit_enabled && !entry.rate_limiter.check(Instant::now()) {
                Some(entry.remote_addr)
            } else {
                entry.last_activity = Instant::now();
                None
            }
        };

        match violation_addr {
            Some(addr) => {
                self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
                let until = Instant::now() + self.config.ban_duration;
                self.banned.write().await.insert(addr.ip(), until);
                tracing::warn!(
                    connection_id = %id,
                    remote_addr = %addr,
                    ban_secs = self.config.ban_duration.as_secs(),
                    "rate limit violation, banning origin"
                );
                self.force_close(id, close_code::RATE_LIMITED, "rate limit exceeded")
                    .await;
                false
            }
            None => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Drains the pending queue in FIFO order, typically right after a
    /// reconnection. Stops (leaving the rest queued) as soon as the socket
    /// stops accepting writes. Returns the number of messages flushed.
    pub async fn flush_queue(&self, id: ConnectionId) -> usize {
        let Some(entry_lock) = self.connections.read().await.get(&id).cloned() else {
            return 0;
        };
        let mut entry = entry_lock.write().await;
        let mut flushed = 0;
        while let Some(wire) = entry.pending.pop_front() {
            match entry.sender.try_send(OutboundFrame::Text(wire)) {
                Ok(()) => {
                    flushed += 1;
                    self.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(OutboundFrame::Text(w)))
                | Err(mpsc::error::TrySendError::Closed(OutboundFrame::Text(w))) => {
                    entry.pending.push_front(w);
                    break;
                }
                Err(_) => break,
            }
        }
        flushed
    }

    /// Sends a heartbeat probe, bypassing the pending queue.
    ///
    /// Probes are liveness signals: queueing one for later delivery would
    /// defeat its purpose, so a probe that cannot be written immediately
    /// reports `false`.
    pub async fn send_probe(&self, id: ConnectionId) -> bool {
        let Some(entry_lock) = self.connections.read().await.get(&id).cloned() else {
            return false;
        };
        let wire = match Envelope::ping().serialize() {
            Ok(wire) => wire,
            Err(_) => return false,
        };
        let sent = entry_lock
            .read()
            .await
            .sender
            .try_send(OutboundFrame::Text(wire))
            .is_ok();
        if sent {
            let _ = self.event_bus.publish(ServerEvent::Ping {
                connection_id: id,
                timestamp: Utc::now(),
            });
        }
        sent
    }

    /// Force-closes a connection: best-effort close frame, then removal.
    ///
    /// Removal drops the outbound sender, so the socket task observes
    /// end-of-channel even if the close frame could not be queued.
    pub async fn force_close(&self, id: ConnectionId, code: u16, reason: &str) {
        if let Some(entry_lock) = self.connections.read().await.get(&id).cloned() {
            let entry = entry_lock.read().await;
            let _ = entry
                .sender
                .try_send(OutboundFrame::Close(code, reason.to_string()));
        }
        self.remove_connection(id).await;
    }

    /// Force-closes every connection, used during shutdown.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let ids: Vec<ConnectionId> = self.connections.read().await.keys().copied().collect();
        for id in ids {
            self.force_close(id, code, reason).await;
        }
    }

    /// Returns `true` while the connection id is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Returns a summary of one connection, if registered.
    pub async fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let entry_lock = self.connections.read().await.get(&id).cloned()?;
        let entry = entry_lock.read().await;
        Some(ConnectionInfo::from(&*entry))
    }

    /// Returns the user bound to a connection, if authenticated.
    pub async fn user_of(&self, id: ConnectionId) -> Option<String> {
        let entry_lock = self.connections.read().await.get(&id).cloned()?;
        let user = entry_lock.read().await.user_id.clone();
        user
    }

    /// Returns the ids of every registered connection.
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Returns the number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Returns `true` while the given origin's ban is active.
    pub async fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned
            .read()
            .await
            .get(&ip)
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Snapshot of registry counters for the metrics report.
    pub async fn counters(&self) -> RegistryCounters {
        let connections = self.connections.read().await;
        let mut queued = 0;
        for entry_lock in connections.values() {
            queued += entry_lock.read().await.pending.len();
        }
        RegistryCounters {
            active_connections: connections.len(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            queued_messages: queued,
        }
    }
}

/// Registry counter snapshot feeding the periodic metrics report.
#[derive(Debug, Clone, Copy)]
pub struct RegistryCounters {
    /// Connections currently registered.
    pub active_connections: usize,
    /// Connections accepted since startup.
    pub total_connections: u64,
    /// Outbound messages delivered since startup.
    pub messages_sent: u64,
    /// Inbound messages accepted since startup.
    pub messages_received: u64,
    /// Rate-limit violations since startup.
    pub rate_limit_violations: u64,
    /// Messages held in pending queues right now.
    pub queued_messages: usize,
}
