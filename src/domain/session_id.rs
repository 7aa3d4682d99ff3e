//! Type-safe session identifier.
//!
//! Unlike [`super::ConnectionId`], a [`SessionId`] is a durable identity:
//! it outlives any single socket and is what a client presents when
//! resuming after a disconnect.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable identifier for a resumable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random `SessionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `SessionId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a `SessionId` from its string form, as presented by a
    /// resuming client. Returns `None` on malformed input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.parse::<uuid::Uuid>().ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string());
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(SessionId::parse("not-a-uuid"), None);
        assert_eq!(SessionId::parse(""), None);
    }
}
