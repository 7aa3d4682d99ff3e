//! Session continuity: durable identities surviving reconnects.
//!
//! A session decouples a client's identity from any single socket. While
//! a client is disconnected its session keeps a bounded FIFO of pending
//! messages; a resume within the expiry horizon rebinds the session to
//! the new connection and replays the queue in order.

pub mod manager;
pub mod session;

pub use manager::{ResumeOutcome, SessionConfig, SessionManager};
pub use session::Session;
