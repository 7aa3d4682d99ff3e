//! Lifecycle and metrics events emitted by the gateway.
//!
//! Every connection lifecycle transition emits a [`ServerEvent`] through
//! the [`super::EventBus`]. The hosting application subscribes to the bus
//! to observe connections and to receive application-bound messages —
//! events, not exceptions, are how this layer reports per-connection
//! failures upstream.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ConnectionId, SessionId};
use crate::protocol::Envelope;

/// Event emitted on every connection lifecycle transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A connection passed admission and was added to the registry.
    ConnectionAdded {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Peer socket address.
        remote_addr: SocketAddr,
        /// Accept timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A connection was removed from the registry.
    ConnectionRemoved {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Removal timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A connection completed authentication.
    ConnectionAuthenticated {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Authenticated user identifier.
        user_id: String,
        /// Authentication timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An application-bound message arrived on a connection.
    ///
    /// Built-in envelope types (`authenticate`, `ping`, `pong`,
    /// `reconnect`) are consumed inside the gateway and never appear here.
    MessageReceived {
        /// Originating connection.
        connection_id: ConnectionId,
        /// The validated envelope.
        envelope: Envelope,
        /// User bound to the connection, if authenticated.
        user_id: Option<String>,
        /// Receipt timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A heartbeat probe was sent to a connection.
    Ping {
        /// Probed connection.
        connection_id: ConnectionId,
        /// Probe timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A heartbeat acknowledgment arrived from a connection.
    Pong {
        /// Acknowledging connection.
        connection_id: ConnectionId,
        /// Acknowledgment timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A connection exhausted its missed-ping budget.
    ///
    /// Emitted exactly once per connection; the registry force-closes the
    /// socket immediately after.
    ConnectionDead {
        /// The dead connection.
        connection_id: ConnectionId,
        /// Missed-ping count at the moment of death.
        missed_pings: u32,
        /// Detection timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A session was resumed onto a new connection.
    SessionResumed {
        /// The resumed session.
        session_id: SessionId,
        /// The new connection it was bound to.
        connection_id: ConnectionId,
        /// Total reconnect count after this resume.
        reconnect_count: u32,
        /// Resume timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Periodic metrics snapshot.
    MetricsSnapshot {
        /// The snapshot payload.
        report: MetricsReport,
        /// Snapshot timestamp.
        timestamp: DateTime<Utc>,
    },
}

/// Point-in-time metrics across the registry, heartbeat monitor, and
/// session manager.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    /// Connections currently in the registry.
    pub active_connections: usize,
    /// Connections accepted since startup.
    pub total_connections: u64,
    /// Outbound messages delivered since startup.
    pub messages_sent: u64,
    /// Inbound messages accepted since startup.
    pub messages_received: u64,
    /// Successful session resumes since startup.
    pub reconnections: u64,
    /// Rate-limit violations since startup.
    pub rate_limit_violations: u64,
    /// Messages currently held in per-connection outbound queues.
    pub queued_messages: usize,
    /// Heartbeat monitor state.
    pub heartbeat_stats: HeartbeatStats,
    /// Session manager state.
    pub session_stats: SessionStats,
}

/// Heartbeat monitor counters for the metrics snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeartbeatStats {
    /// Connections currently tracked for liveness.
    pub tracked: usize,
    /// Tracked connections with at least one missed ping.
    pub suspect: usize,
}

/// Session manager counters for the metrics snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStats {
    /// Sessions currently bound to a live connection.
    pub connected: usize,
    /// Sessions awaiting a resume.
    pub detached: usize,
    /// Messages queued across all session queues.
    pub queued_messages: usize,
}
