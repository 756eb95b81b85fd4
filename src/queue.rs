//! FIFO backlog of writes that could not be pushed immediately.
//!
//! Entries leave the queue only when they are pushed successfully, when an
//! operator clears the queue, when they exhaust their retry budget, or when
//! the queue overflows. The last two are logged and counted.
//!
//! When a snapshot path is configured the queue is written to disk and
//! reloaded on startup, so pending writes survive restarts. Appends schedule
//! a write on the blocking pool; a drain pass writes once when it ends.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::record::{Record, SyncOperation};

/// A write waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub table: String,
    pub operation: SyncOperation,
    pub record: Record,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(table: impl Into<String>, operation: SyncOperation, record: Record) -> Self {
        Self {
            id: Uuid::new_v4(),
            table: table.into(),
            operation,
            record,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pending {
    entry: QueueEntry,
    attempts: u32,
}

type Entries = Arc<Mutex<VecDeque<Pending>>>;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Left queued behind an earlier failed write to the same record.
    pub deferred: usize,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
}

/// Bounds applied to the queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_len: usize,
    pub max_attempts: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_len: 10_000,
            max_attempts: 5,
        }
    }
}

/// On-disk copy of the queue.
struct Snapshot {
    path: PathBuf,
    write_lock: Mutex<()>,
    /// A background write is queued and has not started yet.
    scheduled: AtomicBool,
    writes: AtomicU64,
}

impl Snapshot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            scheduled: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// Writes the current entries. The state is read under the write lock,
    /// so a later write never loses to an earlier one.
    fn write(&self, entries: &Mutex<VecDeque<Pending>>) {
        let _guard = self.write_lock.lock();
        self.scheduled.store(false, Ordering::SeqCst);
        self.write_locked(entries);
    }

    /// Background variant: skipped when a flush already covered it.
    fn write_if_scheduled(&self, entries: &Mutex<VecDeque<Pending>>) {
        let _guard = self.write_lock.lock();
        if self.scheduled.swap(false, Ordering::SeqCst) {
            self.write_locked(entries);
        }
    }

    fn write_locked(&self, entries: &Mutex<VecDeque<Pending>>) {
        let snapshot: Vec<Pending> = entries.lock().iter().cloned().collect();
        match write_snapshot(&self.path, &snapshot) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!("Failed to persist sync queue to {}: {}", self.path.display(), e)
            }
        }
    }
}

/// Clears the drain flag when a pass ends, is cancelled, or panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncQueue {
    entries: Entries,
    limits: QueueLimits,
    snapshot: Option<Arc<Snapshot>>,
    draining: AtomicBool,
    dropped_total: AtomicU64,
}

impl SyncQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            limits,
            snapshot: None,
            draining: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Opens a queue persisted at `path`, reloading any saved entries.
    pub fn persistent(limits: QueueLimits, path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<VecDeque<Pending>>(&contents).map_err(|e| {
                SyncError::Queue(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                return Err(SyncError::Queue(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if !entries.is_empty() {
            tracing::info!(
                "Loaded {} pending sync entr{} from {}",
                entries.len(),
                if entries.len() == 1 { "y" } else { "ies" },
                path.display()
            );
        }

        let mut queue = Self::new(limits);
        queue.entries = Arc::new(Mutex::new(entries));
        queue.snapshot = Some(Arc::new(Snapshot::new(path)));
        Ok(queue)
    }

    /// Appends a write. Never deduplicates.
    ///
    /// Returns the queue length after the append.
    pub fn add_to_queue(
        &self,
        table: impl Into<String>,
        operation: SyncOperation,
        record: Record,
    ) -> usize {
        let entry = QueueEntry::new(table, operation, record);
        tracing::debug!(
            "Queued {} on '{}' ({})",
            entry.operation,
            entry.table,
            entry.id
        );

        let (len, overflow) = {
            let mut entries = self.entries.lock();
            entries.push_back(Pending { entry, attempts: 0 });
            let mut overflow = 0;
            while entries.len() > self.limits.max_len {
                entries.pop_front();
                overflow += 1;
            }
            (entries.len(), overflow)
        };

        if overflow > 0 {
            self.dropped_total.fetch_add(overflow, Ordering::Relaxed);
            tracing::warn!(
                "Sync queue exceeded {} entries; dropped {} oldest pending write(s)",
                self.limits.max_len,
                overflow
            );
        }

        self.schedule_persist();
        len
    }

    /// Pushes every queued entry once, oldest first.
    ///
    /// Entries added while the pass runs wait for the next pass. Failed
    /// entries stay in place and are retried until `max_attempts`. Once a
    /// write to a record fails, later writes to the same record are held back
    /// for the rest of the pass so they never overtake it.
    pub async fn drain_queue(&self, engine: &SyncEngine) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Queue drain already in progress");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        let _draining = DrainGuard(&self.draining);

        let batch: Vec<QueueEntry> = self.entries.lock().iter().map(|p| p.entry.clone()).collect();
        let mut report = DrainReport::default();
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for entry in batch {
            let key = record_key(engine, &entry);
            if key.as_ref().is_some_and(|key| blocked.contains(key)) {
                report.deferred += 1;
                continue;
            }

            let result = engine
                .try_sync_record_to_remote(&entry.table, entry.operation, &entry.record)
                .await;

            match result {
                Ok(_) => {
                    self.remove(entry.id);
                    report.synced += 1;
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(
                        "Dropping queued {} on '{}' ({}): {}",
                        entry.operation,
                        entry.table,
                        entry.id,
                        e
                    );
                    self.remove(entry.id);
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                }
                Err(e) => {
                    let attempts = self.record_failure(entry.id);
                    if attempts >= self.limits.max_attempts {
                        tracing::error!(
                            "Dropping queued {} on '{}' ({}) after {} attempts: {}",
                            entry.operation,
                            entry.table,
                            entry.id,
                            attempts,
                            e
                        );
                        self.remove(entry.id);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        report.dropped += 1;
                    } else {
                        tracing::warn!(
                            "Queued {} on '{}' failed (attempt {}): {}",
                            entry.operation,
                            entry.table,
                            attempts,
                            e
                        );
                        blocked.extend(key);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.synced + report.failed + report.dropped > 0 {
            self.flush().await;
            tracing::info!(
                "Queue drain: {} synced, {} failed, {} dropped, {} deferred",
                report.synced,
                report.failed,
                report.dropped,
                report.deferred
            );
        }
        report
    }

    /// Removes every pending entry. Operator action only.
    pub fn clear_queue(&self) -> usize {
        let cleared = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        tracing::warn!("Sync queue cleared by operator ({} entries)", cleared);
        self.schedule_persist();
        cleared
    }

    /// Writes the snapshot now and waits for it.
    pub async fn flush(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let (snapshot, entries) = (Arc::clone(snapshot), Arc::clone(&self.entries));
        if let Err(e) = tokio::task::spawn_blocking(move || snapshot.write(&entries)).await {
            tracing::warn!("Sync queue snapshot task failed: {}", e);
        }
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().iter().map(|p| p.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries lost to overflow or exhausted retries since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn remove(&self, id: Uuid) {
        self.entries.lock().retain(|p| p.entry.id != id);
    }

    fn record_failure(&self, id: Uuid) -> u32 {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|p| p.entry.id == id) {
            Some(pending) => {
                pending.attempts += 1;
                pending.attempts
            }
            // Cleared while in flight
            None => 0,
        }
    }

    /// Queues one background write; appends in quick succession share it.
    fn schedule_persist(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        if snapshot.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let (snapshot, entries) = (Arc::clone(snapshot), Arc::clone(&self.entries));
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || snapshot.write_if_scheduled(&entries));
            }
            // No runtime to offload to
            Err(_) => snapshot.write_if_scheduled(&entries),
        }
    }

    #[cfg(test)]
    fn snapshot_writes(&self) -> u64 {
        self.snapshot
            .as_ref()
            .map(|s| s.writes.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Identity of the record an entry writes, keyed by local table name.
fn record_key(engine: &SyncEngine, entry: &QueueEntry) -> Option<(String, String)> {
    let id = entry.record.id().ok()?;
    let table = engine
        .registry()
        .resolve(&entry.table)
        .map(|m| m.local_name.clone())
        .unwrap_or_else(|_| entry.table.clone());
    Some((table, id))
}

fn write_snapshot(path: &Path, snapshot: &[Pending]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let bytes = serde_json::to_vec(snapshot)?;

    // Write atomically using temp file + rename
    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
}
