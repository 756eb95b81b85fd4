//! Sync entry point called after every local mutation.
//!
//! Business code calls [`SyncHook::sync_after_operation`] once its local write
//! has committed. The hook pushes right away when the remote store is
//! reachable and queues the write otherwise; it never fails the caller.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::queue::SyncQueue;
use crate::record::{Record, SyncOperation};
use crate::supervisor::TaskSupervisor;

#[derive(Debug, Default)]
struct Debounce {
    generation: u64,
    pending: Vec<(String, SyncOperation, Record)>,
}

#[derive(Clone)]
pub struct SyncHook {
    engine: Arc<SyncEngine>,
    queue: Arc<SyncQueue>,
    monitor: Arc<ConnectivityMonitor>,
    supervisor: TaskSupervisor,
    debounce: Arc<Mutex<Debounce>>,
    flushes: Arc<AtomicU64>,
}

impl SyncHook {
    pub fn new(
        engine: Arc<SyncEngine>,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectivityMonitor>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            engine,
            queue,
            monitor,
            supervisor,
            debounce: Arc::new(Mutex::new(Debounce::default())),
            flushes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Propagates one committed local write. Returns `true` only when the
    /// remote store accepted it immediately.
    pub async fn sync_after_operation(
        &self,
        table: &str,
        operation: SyncOperation,
        record: Record,
    ) -> bool {
        match self.try_sync_after_operation(table, operation, record).await {
            Ok(()) => true,
            Err(SyncError::Connectivity(_)) => false,
            Err(e @ (SyncError::InvalidRecord(_) | SyncError::Mapping(_))) => {
                tracing::error!("Rejected {} on '{}': {}", operation, table, e);
                false
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Like [`sync_after_operation`](Self::sync_after_operation) but returns
    /// why the write was not pushed.
    ///
    /// `Connectivity` and retryable push errors mean the write was queued.
    pub async fn try_sync_after_operation(
        &self,
        table: &str,
        operation: SyncOperation,
        record: Record,
    ) -> Result<(), SyncError> {
        record.id()?;
        let mapping = self.engine.registry().resolve(table)?.clone();
        if !mapping.direction.allows_push() {
            return Err(SyncError::Mapping(format!(
                "table '{}' is {} and cannot be pushed",
                mapping.local_name, mapping.direction
            )));
        }

        let status = match self.monitor.status() {
            ConnectivityStatus::Unknown => self.monitor.check_connectivity().await,
            status => status,
        };

        if status != ConnectivityStatus::Online {
            let len = self.queue.add_to_queue(table, operation, record);
            tracing::debug!("Offline; queued {} on '{}' ({} pending)", operation, table, len);
            return Err(SyncError::Connectivity(format!(
                "remote store is {}; write queued",
                status
            )));
        }

        match self
            .engine
            .try_sync_record_to_remote(table, operation, &record)
            .await
        {
            Ok(_) => {
                if mapping.direction.allows_pull() {
                    self.spawn_pull(mapping.local_name);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_retryable() {
                    self.queue.add_to_queue(table, operation, record);
                }
                Err(e)
            }
        }
    }

    fn spawn_pull(&self, table: String) {
        let engine = Arc::clone(&self.engine);
        let name = format!("pull:{}", table);
        self.supervisor.spawn(name, async move {
            let report = engine.try_pull_table_from_remote(&table).await?;
            if report.failed > 0 {
                tracing::warn!(
                    "Background pull of '{}' left {} row(s) unsynced",
                    table,
                    report.failed
                );
            }
            Ok(())
        });
    }

    /// Collects writes and flushes them together once `delay` passes without
    /// another call. Each call restarts the quiet period.
    pub fn debounced_sync(
        &self,
        table: impl Into<String>,
        operation: SyncOperation,
        record: Record,
        delay: Duration,
    ) {
        let generation = {
            let mut debounce = self.debounce.lock();
            debounce.pending.push((table.into(), operation, record));
            debounce.generation += 1;
            debounce.generation
        };

        let hook = self.clone();
        self.supervisor.spawn("debounce", async move {
            tokio::time::sleep(delay).await;
            hook.flush_if_quiet(generation).await;
            Ok(())
        });
    }

    async fn flush_if_quiet(&self, generation: u64) {
        let batch = {
            let mut debounce = self.debounce.lock();
            if debounce.generation != generation {
                // A newer call restarted the timer
                return;
            }
            std::mem::take(&mut debounce.pending)
        };
        if batch.is_empty() {
            return;
        }

        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Flushing {} debounced write(s)", batch.len());
        for (table, operation, record) in batch {
            self.sync_after_operation(&table, operation, record).await;
        }
    }

    /// Number of debounced flushes performed.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn pending_debounced(&self) -> usize {
        self.debounce.lock().pending.len()
    }
}
