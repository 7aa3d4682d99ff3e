//! Connection entry combining the outbound channel with server-side
//! metadata.
//!
//! The registry owns each connection's lifecycle; the socket task owns
//! the actual `WebSocket`. They meet at a bounded mpsc channel of
//! [`OutboundFrame`]s: the registry writes frames into the channel and the
//! socket task drains them onto the wire. The heartbeat monitor never
//! touches the socket directly — it only observes through the registry.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::ConnectionId;
use super::rate_limit::RateLimiterState;

/// Frame handed from the registry to a connection's socket task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A serialized text envelope to write to the wire.
    Text(String),
    /// Close the socket with the given close code and reason.
    Close(u16, String),
}

/// One live connection in the registry.
///
/// Mutated on authentication, on every inbound message (activity stamp),
/// and by send attempts (pending queue). Removed exactly once,
/// synchronously with socket closure.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Unique connection identifier (immutable after accept).
    pub id: ConnectionId,

    /// Peer socket address (immutable after accept).
    pub remote_addr: SocketAddr,

    /// Negotiated `User-Agent` string, if the client sent one.
    pub user_agent: Option<String>,

    /// Accept timestamp (immutable after accept).
    pub connected_at: DateTime<Utc>,

    /// Monotonic timestamp of the last accepted inbound message.
    pub last_activity: Instant,

    /// Whether the connection has completed authentication.
    pub is_authenticated: bool,

    /// User bound at authentication time.
    pub user_id: Option<String>,

    /// Free-form metadata supplied at authentication time.
    pub metadata: HashMap<String, serde_json::Value>,

    /// Channel into the socket task.
    pub sender: mpsc::Sender<OutboundFrame>,

    /// Messages that could not be written synchronously, oldest first.
    /// Bounded: the oldest entry is evicted when the cap is reached.
    pub pending: VecDeque<String>,

    /// Embedded fixed-window rate limiter.
    pub rate_limiter: RateLimiterState,
}

impl ConnectionEntry {
    /// Creates a new entry for a just-accepted connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        user_agent: Option<String>,
        sender: mpsc::Sender<OutboundFrame>,
        rate_window: Duration,
        rate_max_requests: u32,
    ) -> Self {
        Self {
            id,
            remote_addr,
            user_agent,
            connected_at: Utc::now(),
            last_activity: Instant::now(),
            is_authenticated: false,
            user_id: None,
            metadata: HashMap::new(),
            sender,
            pending: VecDeque::new(),
            rate_limiter: RateLimiterState::new(rate_window, rate_max_requests),
        }
    }

    /// Appends a message to the pending queue, evicting the oldest entry
    /// when `cap` is reached.
    pub fn push_pending(&mut self, message: String, cap: usize) {
        if self.pending.len() >= cap {
            self.pending.pop_front();
        }
        self.pending.push_back(message);
    }
}

/// Lightweight connection summary for events and list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Peer socket address.
    pub remote_addr: SocketAddr,
    /// Negotiated `User-Agent`, if any.
    pub user_agent: Option<String>,
    /// Accept timestamp.
    pub connected_at: DateTime<Utc>,
    /// Whether the connection is authenticated.
    pub is_authenticated: bool,
    /// Bound user, if authenticated.
    pub user_id: Option<String>,
    /// Messages currently held in the pending queue.
    pub pending_messages: usize,
}

impl From<&ConnectionEntry> for ConnectionInfo {
    fn from(entry: &ConnectionEntry) -> Self {
        Self {
            connection_id: entry.id,
            remote_addr: entry.remote_addr,
            user_agent: entry.user_agent.clone(),
            connected_at: entry.connected_at,
            is_authenticated: entry.is_authenticated,
            user_id: entry.user_id.clone(),
            pending_messages: entry.pending.len(),
        }
    }
}
