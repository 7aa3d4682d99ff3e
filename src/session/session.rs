//! A single durable session and its bounded message queue.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{ConnectionId, SessionId};

/// Durable identity surviving across reconnects.
///
/// At most one live connection is bound at any time; `connection_id` is
/// `None` while the client is disconnected. Disconnection never destroys
/// a session — only the expiry sweep does.
#[derive(Debug)]
pub struct Session {
    /// Session identifier (immutable after creation).
    pub id: SessionId,

    /// Currently bound connection, `None` while disconnected.
    pub connection_id: Option<ConnectionId>,

    /// Creation timestamp (immutable after creation).
    pub created_at: DateTime<Utc>,

    /// Timestamp of the most recent bind.
    pub last_connected_at: DateTime<Utc>,

    /// Timestamp of the most recent unbind, `None` while connected.
    pub disconnected_at: Option<DateTime<Utc>>,

    /// Number of successful resumes onto this session.
    pub reconnect_count: u32,

    /// Arbitrary application state carried across reconnects.
    pub user_data: Option<Value>,

    /// Pending outbound messages, oldest first.
    queue: VecDeque<Value>,
}

impl Session {
    /// Creates a fresh session bound to `connection_id`.
    #[must_use]
    pub fn new(id: SessionId, connection_id: ConnectionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            connection_id: Some(connection_id),
            created_at: now,
            last_connected_at: now,
            disconnected_at: None,
            reconnect_count: 0,
            user_data: None,
            queue: VecDeque::new(),
        }
    }

    /// Appends a message to the pending queue, evicting the oldest entry
    /// when `cap` is reached.
    pub fn enqueue(&mut self, message: Value, cap: usize) {
        if self.queue.len() >= cap {
            self.queue.pop_front();
        }
        self.queue.push_back(message);
    }

    /// Drains the entire queue in FIFO order, leaving it empty.
    pub fn drain_queue(&mut self) -> Vec<Value> {
        self.queue.drain(..).collect()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The session's most recent activity: disconnect time, or the last
    /// bind time if it never disconnected.
    #[must_use]
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.disconnected_at.unwrap_or(self.last_connected_at)
    }

    /// Whether the session has outlived `max_age` at instant `now`.
    #[must_use]
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let horizon = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_seen()) > horizon
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_session() -> Session {
        Session::new(SessionId::new(), ConnectionId::new())
    }

    #[test]
    fn queue_is_fifo() {
        let mut session = make_session();
        session.enqueue(json!(1), 10);
        session.enqueue(json!(2), 10);
        session.enqueue(json!(3), 10);

        assert_eq!(session.drain_queue(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn queue_never_exceeds_cap_and_drops_oldest() {
        let mut session = make_session();
        for i in 0..5 {
            session.enqueue(json!(i), 3);
        }
        assert_eq!(session.queue_len(), 3);
        assert_eq!(session.drain_queue(), vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn expiry_uses_disconnect_time_when_present() {
        let mut session = make_session();
        let max_age = Duration::from_secs(3600);

        // Connected and recent: not expired.
        assert!(!session.is_expired(max_age, Utc::now()));

        session.disconnected_at = Some(Utc::now() - chrono::Duration::seconds(7200));
        assert!(session.is_expired(max_age, Utc::now()));
    }
}
