//! Picks the store that serves reads and writes right now.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::store::{StoreClient, StoreType};

/// Which store the application prefers when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Always serve from the local store; the remote is a sync target.
    #[default]
    Offline,
    /// Serve from the remote store whenever it is reachable.
    Online,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Offline => write!(f, "offline"),
            StoreMode::Online => write!(f, "online"),
        }
    }
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offline" | "local" => Ok(StoreMode::Offline),
            "online" | "remote" => Ok(StoreMode::Online),
            _ => Err(format!(
                "Invalid store mode '{}'. Valid options: offline, online",
                s
            )),
        }
    }
}

const LOCAL: u8 = 0;
const REMOTE: u8 = 1;

pub struct DatabaseSelector {
    local: Arc<dyn StoreClient>,
    remote: Arc<dyn StoreClient>,
    monitor: Arc<ConnectivityMonitor>,
    mode: StoreMode,
    current: AtomicU8,
}

impl DatabaseSelector {
    pub fn new(
        local: Arc<dyn StoreClient>,
        remote: Arc<dyn StoreClient>,
        monitor: Arc<ConnectivityMonitor>,
        mode: StoreMode,
    ) -> Self {
        Self {
            local,
            remote,
            monitor,
            mode,
            current: AtomicU8::new(LOCAL),
        }
    }

    /// Returns a usable client for the current connectivity and mode.
    ///
    /// Never fails: when the remote is preferred but unreachable the local
    /// store is handed out instead.
    pub fn get_client(&self) -> Arc<dyn StoreClient> {
        let target = match self.mode {
            StoreMode::Offline => StoreType::Local,
            StoreMode::Online if self.monitor.is_online() => StoreType::Remote,
            StoreMode::Online => StoreType::Local,
        };

        let encoded = match target {
            StoreType::Local => LOCAL,
            StoreType::Remote => REMOTE,
        };
        let previous = self.current.swap(encoded, Ordering::SeqCst);

        if previous != encoded {
            if self.mode == StoreMode::Online && target == StoreType::Local {
                tracing::warn!(
                    "Remote store is {}; falling back to local store",
                    self.monitor.status()
                );
            } else {
                tracing::info!("Switched to {} store", target);
            }
        }

        match target {
            StoreType::Local => Arc::clone(&self.local),
            StoreType::Remote => Arc::clone(&self.remote),
        }
    }

    pub fn local(&self) -> &Arc<dyn StoreClient> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn StoreClient> {
        &self.remote
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// The store most recently handed out by [`get_client`](Self::get_client).
    pub fn current_type(&self) -> StoreType {
        match self.current.load(Ordering::SeqCst) {
            REMOTE => StoreType::Remote,
            _ => StoreType::Local,
        }
    }

    pub fn connection_status(&self) -> ConnectivityStatus {
        self.monitor.status()
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct TestContext {
        remote: Arc<MemoryStore>,
        monitor: Arc<ConnectivityMonitor>,
        selector: DatabaseSelector,
    }

    fn setup(mode: StoreMode) -> TestContext {
        let local = Arc::new(MemoryStore::new(StoreType::Local));
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let monitor = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            Duration::from_secs(2),
        ));
        let selector = DatabaseSelector::new(local, remote.clone(), monitor.clone(), mode);
        TestContext {
            remote,
            monitor,
            selector,
        }
    }

    #[tokio::test]
    async fn test_offline_mode_always_local() {
        let ctx = setup(StoreMode::Offline);
        ctx.monitor.check_connectivity().await;
        assert!(ctx.selector.is_online());
        assert_eq!(ctx.selector.get_client().store_type(), StoreType::Local);
        assert_eq!(ctx.selector.current_type(), StoreType::Local);
    }

    #[tokio::test]
    async fn test_online_mode_follows_connectivity() {
        let ctx = setup(StoreMode::Online);

        // Unknown status is treated as unreachable
        assert_eq!(ctx.selector.get_client().store_type(), StoreType::Local);

        ctx.monitor.check_connectivity().await;
        assert_eq!(ctx.selector.get_client().store_type(), StoreType::Remote);
        assert_eq!(ctx.selector.current_type(), StoreType::Remote);

        ctx.remote.set_reachable(false);
        ctx.monitor.check_connectivity().await;
        assert!(ctx.selector.is_offline());
        assert_eq!(ctx.selector.get_client().store_type(), StoreType::Local);
        assert_eq!(ctx.selector.current_type(), StoreType::Local);
        assert_eq!(
            ctx.selector.connection_status(),
            ConnectivityStatus::Offline
        );
    }

    #[test]
    fn test_store_mode_from_str() {
        assert_eq!(StoreMode::from_str("ONLINE").unwrap(), StoreMode::Online);
        assert_eq!(StoreMode::from_str("local").unwrap(), StoreMode::Offline);
        assert!(StoreMode::from_str("hybrid").is_err());
    }
}
