//! Remote reachability tracking.
//!
//! The monitor probes the remote store, keeps the tri-state
//! [`ConnectivityStatus`], and broadcasts a [`Transition`] whenever a probe
//! crosses an edge. It never starts a sync itself.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::store::StoreClient;
use crate::supervisor::TaskSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Online,
    Offline,
    Unknown,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityStatus::Online => write!(f, "online"),
            ConnectivityStatus::Offline => write!(f, "offline"),
            ConnectivityStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// An edge between two probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Offline -> Online`, or the first successful probe after startup.
    Reconnected,
    /// `Online -> Offline`.
    Disconnected,
}

impl Transition {
    fn between(previous: ConnectivityStatus, next: ConnectivityStatus) -> Option<Self> {
        use ConnectivityStatus::*;
        match (previous, next) {
            (Offline | Unknown, Online) => Some(Transition::Reconnected),
            (Online, Offline) => Some(Transition::Disconnected),
            _ => None,
        }
    }
}

pub struct ConnectivityMonitor {
    remote: Arc<dyn StoreClient>,
    probe_timeout: Duration,
    status: watch::Sender<ConnectivityStatus>,
    transitions: broadcast::Sender<Transition>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl ConnectivityMonitor {
    pub fn new(remote: Arc<dyn StoreClient>, probe_timeout: Duration) -> Self {
        let (status, _) = watch::channel(ConnectivityStatus::Unknown);
        let (transitions, _) = broadcast::channel(16);
        Self {
            remote,
            probe_timeout,
            status,
            transitions,
            last_checked: Mutex::new(None),
        }
    }

    /// Probes the remote store without touching shared state.
    ///
    /// Completes within the probe timeout; any error or expiry is `Offline`.
    pub async fn probe(&self) -> ConnectivityStatus {
        match tokio::time::timeout(self.probe_timeout, self.remote.ping()).await {
            Ok(Ok(())) => ConnectivityStatus::Online,
            Ok(Err(e)) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                ConnectivityStatus::Offline
            }
            Err(_) => {
                tracing::debug!(
                    "Connectivity probe timed out after {} ms",
                    self.probe_timeout.as_millis()
                );
                ConnectivityStatus::Offline
            }
        }
    }

    /// Probes the remote store and records the result.
    pub async fn check_connectivity(&self) -> ConnectivityStatus {
        let status = self.probe().await;
        self.record(status);
        status
    }

    /// Probes, records, and returns the edge crossed, if any.
    pub async fn refresh(&self) -> Option<Transition> {
        let status = self.probe().await;
        self.record(status)
    }

    /// Stores a probe result and broadcasts the transition it causes.
    pub fn record(&self, status: ConnectivityStatus) -> Option<Transition> {
        *self.last_checked.lock() = Some(Utc::now());

        let previous = self.status.send_replace(status);
        let transition = Transition::between(previous, status);

        match transition {
            Some(Transition::Reconnected) => {
                tracing::info!("Remote store reachable ({} -> {})", previous, status)
            }
            Some(Transition::Disconnected) => {
                tracing::warn!("Remote store unreachable ({} -> {})", previous, status)
            }
            None => {}
        }

        if let Some(transition) = transition {
            // No subscribers is fine
            let _ = self.transitions.send(transition);
        }
        transition
    }

    pub fn status(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == ConnectivityStatus::Online
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self.last_checked.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Probes immediately, then on a fixed period until `stop` flips.
    pub fn start_monitoring(
        self: &Arc<Self>,
        interval: Duration,
        supervisor: &TaskSupervisor,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        supervisor.spawn("connectivity", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        monitor.refresh().await;
                    }
                }
            }
            tracing::debug!("Stopped connectivity monitor");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreType};

    fn monitor_with(remote: Arc<MemoryStore>, timeout: Duration) -> ConnectivityMonitor {
        ConnectivityMonitor::new(remote, timeout)
    }

    #[tokio::test]
    async fn test_starts_unknown() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let monitor = monitor_with(remote, Duration::from_secs(2));
        assert_eq!(monitor.status(), ConnectivityStatus::Unknown);
        assert!(monitor.last_checked().is_none());
    }

    #[tokio::test]
    async fn test_reachable_remote_is_online() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let monitor = monitor_with(remote, Duration::from_secs(2));
        assert_eq!(
            monitor.check_connectivity().await,
            ConnectivityStatus::Online
        );
        assert!(monitor.is_online());
        assert!(monitor.last_checked().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_remote_times_out_offline() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        remote.set_latency(Some(Duration::from_secs(60)));
        let monitor = monitor_with(remote, Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let status = monitor.check_connectivity().await;
        let elapsed = started.elapsed();

        assert_eq!(status, ConnectivityStatus::Offline);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_transitions_are_edges_only() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let monitor = monitor_with(remote.clone(), Duration::from_secs(2));
        let mut events = monitor.subscribe();

        assert_eq!(monitor.refresh().await, Some(Transition::Reconnected));
        // Steady state crosses no edge
        assert_eq!(monitor.refresh().await, None);

        remote.set_reachable(false);
        assert_eq!(monitor.refresh().await, Some(Transition::Disconnected));
        assert_eq!(monitor.refresh().await, None);

        remote.set_reachable(true);
        assert_eq!(monitor.refresh().await, Some(Transition::Reconnected));

        assert_eq!(events.try_recv().unwrap(), Transition::Reconnected);
        assert_eq!(events.try_recv().unwrap(), Transition::Disconnected);
        assert_eq!(events.try_recv().unwrap(), Transition::Reconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_checks_periodically_until_stopped() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let monitor = Arc::new(monitor_with(remote.clone(), Duration::from_secs(2)));
        let supervisor = TaskSupervisor::new();
        let mut events = monitor.subscribe();
        let (stop, stop_rx) = watch::channel(false);

        let handle = monitor.start_monitoring(Duration::from_secs(10), &supervisor, stop_rx);

        // First probe runs at once
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.status(), ConnectivityStatus::Online);
        assert_eq!(events.try_recv().unwrap(), Transition::Reconnected);

        remote.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.status(), ConnectivityStatus::Offline);
        assert_eq!(events.try_recv().unwrap(), Transition::Disconnected);

        stop.send_replace(true);
        handle.await.unwrap();
        supervisor.wait_idle().await;
        assert_eq!(supervisor.failure_count(), 0);

        // No probes after stop
        let checked = monitor.last_checked();
        remote.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.last_checked(), checked);
        assert_eq!(monitor.status(), ConnectivityStatus::Offline);
    }

    #[tokio::test]
    async fn test_unknown_to_offline_is_not_an_edge() {
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        remote.set_reachable(false);
        let monitor = monitor_with(remote, Duration::from_secs(2));
        assert_eq!(monitor.refresh().await, None);
        assert_eq!(monitor.status(), ConnectivityStatus::Offline);
    }
}
