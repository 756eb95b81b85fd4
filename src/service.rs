//! Explicitly constructed sync context.
//!
//! [`SyncService`] wires the monitor, selector, queue, engine, hook and
//! supervisor together once at startup and hands out references. It also
//! carries the operator-facing signals: status, queue inspection, manual
//! triggers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::engine::{SyncEngine, SyncReport};
use crate::error::SyncError;
use crate::hook::SyncHook;
use crate::mapping::TableRegistry;
use crate::queue::{QueueEntry, SyncQueue};
use crate::record::{Record, SyncOperation};
use crate::scheduler::{Schedule, Scheduler, SchedulerHandle};
use crate::selector::{DatabaseSelector, StoreMode};
use crate::store::{StoreClient, StoreType};
use crate::supervisor::TaskSupervisor;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub mode: StoreMode,
    pub probe_timeout: Duration,
    pub debounce: Duration,
    pub schedule: Schedule,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            probe_timeout: Duration::from_secs(2),
            debounce: Duration::from_secs(1),
            schedule: Schedule::default(),
        }
    }
}

/// Point-in-time view of the sync subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSnapshot {
    pub connection_status: ConnectivityStatus,
    pub current_store_type: StoreType,
    pub pending_items_count: usize,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub dropped_items_count: u64,
    pub background_failures: u64,
    pub sync_running: bool,
}

pub struct SyncService {
    monitor: Arc<ConnectivityMonitor>,
    selector: DatabaseSelector,
    queue: Arc<SyncQueue>,
    engine: Arc<SyncEngine>,
    hook: SyncHook,
    supervisor: TaskSupervisor,
    options: ServiceOptions,
}

impl SyncService {
    pub fn new(
        local: Arc<dyn StoreClient>,
        remote: Arc<dyn StoreClient>,
        registry: TableRegistry,
        queue: SyncQueue,
        options: ServiceOptions,
    ) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&remote),
            options.probe_timeout,
        ));
        let selector = DatabaseSelector::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&monitor),
            options.mode,
        );
        let engine = Arc::new(SyncEngine::new(Arc::new(registry), local, remote));
        let queue = Arc::new(queue);
        let supervisor = TaskSupervisor::new();
        let hook = SyncHook::new(
            Arc::clone(&engine),
            Arc::clone(&queue),
            Arc::clone(&monitor),
            supervisor.clone(),
        );

        Self {
            monitor,
            selector,
            queue,
            engine,
            hook,
            supervisor,
            options,
        }
    }

    pub fn get_sync_status(&self) -> SyncStatusSnapshot {
        let engine = self.engine.snapshot();
        SyncStatusSnapshot {
            connection_status: self.monitor.status(),
            current_store_type: self.selector.current_type(),
            pending_items_count: self.queue.len(),
            last_sync_timestamp: engine.last_sync_at,
            last_checked: self.monitor.last_checked(),
            error_count: engine.total_errors,
            dropped_items_count: self.queue.dropped_count(),
            background_failures: self.supervisor.failure_count(),
            sync_running: self.engine.is_running() || self.queue.is_draining(),
        }
    }

    pub async fn check_connectivity(&self) -> ConnectivityStatus {
        self.monitor.check_connectivity().await
    }

    pub fn get_sync_queue(&self) -> Vec<QueueEntry> {
        self.queue.entries()
    }

    pub fn clear_sync_queue(&self) -> usize {
        self.queue.clear_queue()
    }

    /// Writes the queue snapshot and waits for it.
    pub async fn flush_queue(&self) {
        self.queue.flush().await
    }

    /// Drains the queue, then pushes every pushable table.
    pub async fn trigger_sync_to_remote(&self) -> Result<SyncReport, SyncError> {
        self.require_online().await?;

        let drained = self.queue.drain_queue(&self.engine).await;
        let pushed = self.engine.push_all().await;
        Ok(SyncReport {
            local_to_remote: drained.synced + pushed.local_to_remote,
            remote_to_local: 0,
            errors: drained.failed + drained.dropped + pushed.errors,
            skipped: pushed.skipped,
        })
    }

    /// Pulls every pullable table in full.
    pub async fn trigger_sync_to_local(&self) -> Result<SyncReport, SyncError> {
        self.require_online().await?;
        Ok(self.engine.pull_all().await)
    }

    /// Drains the queue and runs one bidirectional sweep.
    pub async fn trigger_full_sync(&self) -> Result<SyncReport, SyncError> {
        self.require_online().await?;

        let drained = self.queue.drain_queue(&self.engine).await;
        let mut report = self.engine.bidirectional_sync().await;
        report.local_to_remote += drained.synced;
        report.errors += drained.failed + drained.dropped;
        Ok(report)
    }

    pub async fn initialize_database(&self) -> bool {
        self.engine.initialize_database().await
    }

    pub async fn sync_after_operation(
        &self,
        table: &str,
        operation: SyncOperation,
        record: Record,
    ) -> bool {
        self.hook.sync_after_operation(table, operation, record).await
    }

    /// Debounced variant using the configured quiet period.
    pub fn debounced_sync(&self, table: &str, operation: SyncOperation, record: Record) {
        self.hook
            .debounced_sync(table, operation, record, self.options.debounce);
    }

    pub fn start_scheduler(&self) -> SchedulerHandle {
        Scheduler::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.queue),
            Arc::clone(&self.monitor),
            self.supervisor.clone(),
            self.options.schedule,
        )
        .start()
    }

    pub fn get_client(&self) -> Arc<dyn StoreClient> {
        self.selector.get_client()
    }

    pub fn selector(&self) -> &DatabaseSelector {
        &self.selector
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn hook(&self) -> &SyncHook {
        &self.hook
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    async fn require_online(&self) -> Result<(), SyncError> {
        match self.monitor.check_connectivity().await {
            ConnectivityStatus::Online => Ok(()),
            status => Err(SyncError::Connectivity(format!(
                "remote store is {}",
                status
            ))),
        }
    }
}
