//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), each with a sensible default. The
//! config is an explicitly constructed value passed down to every
//! component, so tests can run multiple independent server instances.

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::RegistryConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::protocol::envelope::DEFAULT_MAX_MESSAGE_BYTES;
use crate::session::SessionConfig;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`ServerConfig::from_env`], or built
/// directly in tests.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Maximum simultaneous connections before admission rejects.
    pub max_connections: usize,

    /// Per-connection outbound queue cap (oldest evicted on overflow).
    pub message_queue_cap: usize,

    /// Wire-size ceiling for a single envelope, in bytes.
    pub max_message_bytes: usize,

    /// Master switch for the fixed-window rate limiter.
    pub rate_limit_enabled: bool,

    /// Rate-limit window size.
    pub rate_limit_window: Duration,

    /// Requests allowed per rate-limit window.
    pub rate_limit_max_requests: u32,

    /// How long a violating origin stays banned.
    pub rate_limit_ban: Duration,

    /// Heartbeat sweep cadence.
    pub heartbeat_interval: Duration,

    /// Silence threshold after which a sweep counts a missed ping.
    pub heartbeat_timeout: Duration,

    /// Missed pings tolerated before a connection is declared dead.
    pub heartbeat_max_missed: u32,

    /// Horizon after which a detached session is garbage-collected.
    pub session_expiry: Duration,

    /// Cadence of the session expiry sweep.
    pub session_sweep_interval: Duration,

    /// Per-session pending queue cap (oldest evicted on overflow).
    pub session_queue_cap: usize,

    /// Advisory reconnect attempt limit advertised to clients.
    pub reconnect_max_attempts: u32,

    /// Advisory reconnect backoff base advertised to clients.
    pub reconnect_backoff: Duration,

    /// Grace period between the shutdown notice and socket teardown.
    pub shutdown_grace: Duration,

    /// Cadence of the periodic metrics snapshot.
    pub metrics_interval: Duration,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            message_queue_cap: 100,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            rate_limit_enabled: true,
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max_requests: 100,
            rate_limit_ban: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            heartbeat_max_missed: 3,
            session_expiry: Duration::from_secs(24 * 3600),
            session_sweep_interval: Duration::from_secs(3600),
            session_queue_cap: 100,
            reconnect_max_attempts: 10,
            reconnect_backoff: Duration::from_millis(1000),
            shutdown_grace: Duration::from_secs(5),
            metrics_interval: Duration::from_secs(60),
            event_bus_capacity: 10_000,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| defaults.listen_addr.to_string())
            .parse()?;

        Ok(Self {
            listen_addr,
            max_connections: parse_env("MAX_CONNECTIONS", defaults.max_connections),
            message_queue_cap: parse_env("MESSAGE_QUEUE_CAP", defaults.message_queue_cap),
            max_message_bytes: parse_env("MAX_MESSAGE_BYTES", defaults.max_message_bytes),
            rate_limit_enabled: parse_env_bool("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            rate_limit_window: Duration::from_millis(parse_env(
                "RATE_LIMIT_WINDOW_MS",
                u64::try_from(defaults.rate_limit_window.as_millis()).unwrap_or(60_000),
            )),
            rate_limit_max_requests: parse_env(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_ban: Duration::from_secs(parse_env(
                "RATE_LIMIT_BAN_SECS",
                defaults.rate_limit_ban.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(parse_env(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            heartbeat_timeout: Duration::from_secs(parse_env(
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )),
            heartbeat_max_missed: parse_env("HEARTBEAT_MAX_MISSED", defaults.heartbeat_max_missed),
            session_expiry: Duration::from_secs(parse_env(
                "SESSION_EXPIRY_SECS",
                defaults.session_expiry.as_secs(),
            )),
            session_sweep_interval: Duration::from_secs(parse_env(
                "SESSION_SWEEP_INTERVAL_SECS",
                defaults.session_sweep_interval.as_secs(),
            )),
            session_queue_cap: parse_env("SESSION_QUEUE_CAP", defaults.session_queue_cap),
            reconnect_max_attempts: parse_env(
                "RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect_max_attempts,
            ),
            reconnect_backoff: Duration::from_millis(parse_env(
                "RECONNECT_BACKOFF_MS",
                u64::try_from(defaults.reconnect_backoff.as_millis()).unwrap_or(1000),
            )),
            shutdown_grace: Duration::from_secs(parse_env(
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
            metrics_interval: Duration::from_secs(parse_env(
                "METRICS_INTERVAL_SECS",
                defaults.metrics_interval.as_secs(),
            )),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
        })
    }

    /// Projects the registry-specific tunables.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: self.max_connections,
            queue_cap: self.message_queue_cap,
            rate_limit_enabled: self.rate_limit_enabled,
            rate_window: self.rate_limit_window,
            rate_max_requests: self.rate_limit_max_requests,
            ban_duration: self.rate_limit_ban,
        }
    }

    /// Projects the heartbeat-specific tunables.
    #[must_use]
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat_interval,
            timeout: self.heartbeat_timeout,
            max_missed: self.heartbeat_max_missed,
        }
    }

    /// Projects the session-manager tunables.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            expiry: self.session_expiry,
            queue_cap: self.session_queue_cap,
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
