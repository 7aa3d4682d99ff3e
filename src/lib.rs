//! # relay-gateway
//!
//! WebSocket gateway implementing the connection-lifecycle and
//! session-continuity layer of a persistent bidirectional messaging
//! server: admission, heartbeat liveness, per-connection rate limiting,
//! and session resume with queued-message replay.
//!
//! Message business logic lives in the hosting application: built-in
//! envelope types (`authenticate`, `ping`, `pong`, `reconnect`) are
//! consumed here, everything else is forwarded on the event bus.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, REST)
//!     │
//!     ├── WS socket tasks (ws/)
//!     ├── System endpoints (api/)
//!     │
//!     ├── RelayServer (server.rs)
//!     │
//!     ├── ConnectionRegistry (domain/)
//!     ├── HeartbeatMonitor (heartbeat/)
//!     ├── SessionManager (session/)
//!     │
//!     └── EventBus → hosting application
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod server;
pub mod session;
pub mod ws;
