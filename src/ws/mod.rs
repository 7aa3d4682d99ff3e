//! WebSocket layer: upgrade handling, the per-socket task, and built-in
//! message dispatch.
//!
//! The WebSocket endpoint at `/ws` provides the bidirectional transport.
//! Each accepted socket runs one task that owns the `WebSocket` value;
//! the registry reaches the socket only through its outbound channel.

pub mod connection;
pub mod handler;
