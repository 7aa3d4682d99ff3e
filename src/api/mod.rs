//! REST surface: health, metrics, and client-advisory protocol config.
//!
//! The gateway is WebSocket-first; these endpoints exist for operators
//! and for clients bootstrapping their reconnect/heartbeat parameters.

pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Builds the REST router (mounted at the root level).
pub fn build_router() -> Router<AppState> {
    system::routes()
}
