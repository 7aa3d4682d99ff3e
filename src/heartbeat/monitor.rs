//! Heartbeat monitor: periodic sweeps over every tracked connection.
//!
//! The monitor holds a typed handle to the [`ConnectionRegistry`] but
//! never owns a socket — it observes liveness and asks the registry to
//! terminate connections it declares dead. One sweep per tick; every
//! wait here is interval-bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::domain::{ConnectionId, ConnectionRegistry, EventBus, HeartbeatStats, ServerEvent};
use crate::error::close_code;

/// Tunables consumed by the heartbeat monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Sweep cadence.
    pub interval: Duration,
    /// Silence threshold after which a tick counts as a missed ping.
    pub timeout: Duration,
    /// Missed pings tolerated before the connection is declared dead.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
            max_missed: 3,
        }
    }
}

/// Per-connection liveness state, owned by the monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    /// Time of the most recent pong (or of tracking start).
    pub last_pong: Instant,
    /// Consecutive ticks without a pong. Reset to 0 by any pong.
    pub missed_pings: u32,
    /// Cleared exactly once, when the connection is declared dead.
    pub alive: bool,
}

impl HeartbeatState {
    fn new() -> Self {
        Self {
            last_pong: Instant::now(),
            missed_pings: 0,
            alive: true,
        }
    }
}

/// Periodic liveness prober over the connection registry.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    states: RwLock<HashMap<ConnectionId, HeartbeatState>>,
    config: HeartbeatConfig,
    registry: Arc<ConnectionRegistry>,
    event_bus: EventBus,
}

impl HeartbeatMonitor {
    /// Creates a monitor over the given registry.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        registry: Arc<ConnectionRegistry>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
            registry,
            event_bus,
        }
    }

    /// Starts tracking a connection, treating "now" as its first pong.
    pub async fn track(&self, id: ConnectionId) {
        self.states.write().await.insert(id, HeartbeatState::new());
    }

    /// Stops tracking a connection. Idempotent.
    pub async fn untrack(&self, id: ConnectionId) {
        self.states.write().await.remove(&id);
    }

    /// Records a pong: stamps `last_pong` and resets the missed counter.
    pub async fn record_pong(&self, id: ConnectionId) {
        if let Some(state) = self.states.write().await.get_mut(&id) {
            state.last_pong = Instant::now();
            state.missed_pings = 0;
            state.alive = true;
        }
        let _ = self.event_bus.publish(ServerEvent::Pong {
            connection_id: id,
            timestamp: Utc::now(),
        });
    }

    /// Runs one sweep over every tracked connection.
    ///
    /// For each connection: gone from the registry ⇒ drop its state;
    /// silent past the timeout ⇒ one more missed ping; missed budget
    /// exhausted ⇒ exactly one [`ServerEvent::ConnectionDead`] plus a
    /// registry force-close; otherwise a ping probe is sent, and a probe
    /// that cannot be written counts as a missed cycle rather than
    /// crashing the sweep.
    pub async fn sweep(&self) {
        let ids: Vec<ConnectionId> = self.states.read().await.keys().copied().collect();

        for id in ids {
            if !self.registry.contains(id).await {
                self.states.write().await.remove(&id);
                continue;
            }

            let dead_missed = {
                let mut states = self.states.write().await;
                let Some(state) = states.get_mut(&id) else {
                    continue;
                };
                if state.last_pong.elapsed() >= self.config.timeout {
                    state.missed_pings = state.missed_pings.saturating_add(1);
                    tracing::debug!(
                        connection_id = %id,
                        missed = state.missed_pings,
                        "heartbeat timeout, connection suspect"
                    );
                }
                if state.missed_pings >= self.config.max_missed {
                    state.alive = false;
                    let missed = state.missed_pings;
                    states.remove(&id);
                    Some(missed)
                } else {
                    None
                }
            };

            if let Some(missed_pings) = dead_missed {
                let _ = self.event_bus.publish(ServerEvent::ConnectionDead {
                    connection_id: id,
                    missed_pings,
                    timestamp: Utc::now(),
                });
                tracing::warn!(connection_id = %id, missed_pings, "connection dead");
                self.registry
                    .force_close(id, close_code::DEAD, "heartbeat timeout")
                    .await;
                continue;
            }

            if !self.registry.send_probe(id).await {
                let mut states = self.states.write().await;
                if let Some(state) = states.get_mut(&id) {
                    state.missed_pings = state.missed_pings.saturating_add(1);
                }
            }
        }
    }

    /// Spawns the sweep loop on a fixed interval. The returned handle is
    /// aborted during shutdown.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.sweep().await;
            }
        })
    }

    /// Number of tracked connections.
    pub async fn tracked(&self) -> usize {
        self.states.read().await.len()
    }

    /// Snapshot for the periodic metrics report.
    pub async fn stats(&self) -> HeartbeatStats {
        let states = self.states.read().await;
        HeartbeatStats {
            tracked: states.len(),
            suspect: states.values().filter(|s| s.missed_pings > 0).count(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{OutboundFrame, RegistryConfig};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn make_parts(
        timeout: Duration,
        max_missed: u32,
    ) -> (Arc<ConnectionRegistry>, Arc<HeartbeatMonitor>, EventBus) {
        let bus = EventBus::new(100);
        let registry = Arc::new(ConnectionRegistry::new(
            RegistryConfig {
                rate_limit_enabled: false,
                ..RegistryConfig::default()
            },
            bus.clone(),
        ));
        let monitor = Arc::new(HeartbeatMonitor::new(
            HeartbeatConfig {
                interval: Duration::from_secs(30),
                timeout,
                max_missed,
            },
            Arc::clone(&registry),
            bus.clone(),
        ));
        (registry, monitor, bus)
    }

    async fn add_connection(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let addr = SocketAddr::from(([127, 0, 0, 1], 4321));
        let id = registry
            .add_connection(addr, None, tx)
            .await
            .ok()
            .unwrap_or_else(|| panic!("admission should succeed"));
        (id, rx)
    }

    #[tokio::test]
    async fn healthy_connection_receives_probe() {
        let (registry, monitor, _bus) = make_parts(Duration::from_secs(60), 3);
        let (id, mut rx) = add_connection(&registry, 8).await;
        monitor.track(id).await;

        monitor.sweep().await;

        assert!(registry.contains(id).await);
        let Ok(OutboundFrame::Text(wire)) = rx.try_recv() else {
            panic!("expected ping probe");
        };
        assert!(wire.contains("\"ping\""));
    }

    #[tokio::test]
    async fn silent_connection_reported_dead_exactly_once() {
        let (registry, monitor, bus) = make_parts(Duration::from_millis(0), 2);
        let (id, _rx) = add_connection(&registry, 8).await;
        monitor.track(id).await;
        let mut events = bus.subscribe();

        // Two sweeps past the (zero) timeout reach max_missed = 2.
        monitor.sweep().await;
        monitor.sweep().await;
        // Further sweeps must not report again.
        monitor.sweep().await;

        assert!(!registry.contains(id).await);
        assert_eq!(monitor.tracked().await, 0);

        let mut dead_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ServerEvent::ConnectionDead { .. }) {
                dead_events += 1;
            }
        }
        assert_eq!(dead_events, 1);
    }

    #[tokio::test]
    async fn pong_resets_missed_counter() {
        let (registry, monitor, _bus) = make_parts(Duration::from_millis(0), 3);
        let (id, mut rx) = add_connection(&registry, 64).await;
        monitor.track(id).await;

        monitor.sweep().await;
        monitor.sweep().await;
        {
            let states = monitor.states.read().await;
            let Some(state) = states.get(&id) else {
                panic!("still tracked");
            };
            assert_eq!(state.missed_pings, 2);
        }

        monitor.record_pong(id).await;
        let states = monitor.states.read().await;
        let Some(state) = states.get(&id) else {
            panic!("still tracked");
        };
        assert_eq!(state.missed_pings, 0);
        assert!(state.alive);
        drop(states);

        // Drain probes to keep the channel healthy.
        while rx.try_recv().is_ok() {}
        assert!(registry.contains(id).await);
    }

    #[tokio::test]
    async fn gone_connection_is_untracked_on_sweep() {
        let (registry, monitor, _bus) = make_parts(Duration::from_secs(60), 3);
        let (id, _rx) = add_connection(&registry, 8).await;
        monitor.track(id).await;

        registry.remove_connection(id).await;
        monitor.sweep().await;
        assert_eq!(monitor.tracked().await, 0);
    }

    #[tokio::test]
    async fn failed_probe_counts_as_missed_cycle() {
        let (registry, monitor, _bus) = make_parts(Duration::from_secs(60), 3);
        // Capacity-1 channel that we never drain: first probe fits, later
        // probes fail to write.
        let (id, _rx) = add_connection(&registry, 1).await;
        monitor.track(id).await;

        monitor.sweep().await; // probe fits
        monitor.sweep().await; // probe fails, missed += 1

        let states = monitor.states.read().await;
        let Some(state) = states.get(&id) else {
            panic!("still tracked");
        };
        assert_eq!(state.missed_pings, 1);
    }
}
