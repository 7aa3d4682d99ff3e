//! Domain layer: identities, connection registry, and event system.
//!
//! This module contains the server-side domain model: connection and
//! session identity, connection entries with their outbound queues and
//! embedded rate limiters, the event bus for broadcasting lifecycle
//! events, and the connection registry for concurrent connection storage.

pub mod connection;
pub mod connection_id;
pub mod event;
pub mod event_bus;
pub mod rate_limit;
pub mod registry;
pub mod session_id;

pub use connection::{ConnectionEntry, ConnectionInfo, OutboundFrame};
pub use connection_id::ConnectionId;
pub use event::{HeartbeatStats, MetricsReport, ServerEvent, SessionStats};
pub use event_bus::EventBus;
pub use rate_limit::RateLimiterState;
pub use registry::{ConnectionRegistry, RegistryConfig, RegistryCounters};
pub use session_id::SessionId;
