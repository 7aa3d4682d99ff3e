//! Liveness probing for every open connection.
//!
//! The monitor runs the `ALIVE → SUSPECT → DEAD` machine: on each tick a
//! connection whose last pong is older than the timeout accrues a missed
//! ping; exhausting the missed-ping budget is terminal and produces
//! exactly one dead-connection notification.

pub mod monitor;

pub use monitor::{HeartbeatConfig, HeartbeatMonitor, HeartbeatState};
