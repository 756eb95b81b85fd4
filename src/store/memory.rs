use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{Filter, StoreClient, StoreType};
use crate::error::StoreError;
use crate::record::Record;

/// A write observed by a [`MemoryStore`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Upsert { table: String, id: String },
    Delete { table: String, id: String },
}

/// In-process store.
///
/// Reachability and latency can be switched at runtime, which makes it the
/// stand-in for a remote store that comes and goes. Every write is journaled.
#[derive(Debug)]
pub struct MemoryStore {
    store_type: StoreType,
    tables: Mutex<HashMap<String, BTreeMap<String, Record>>>,
    journal: Mutex<Vec<JournalEntry>>,
    reachable: AtomicBool,
    failing_upserts: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new(store_type: StoreType) -> Self {
        Self {
            store_type,
            tables: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            failing_upserts: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Makes the next `count` upserts fail as if the store dropped them.
    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Delay applied before every operation.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// All rows of a table ordered by id.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_reachable() {
            return Err(StoreError::Unreachable(format!(
                "{} memory store is offline",
                self.store_type
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn store_type(&self) -> StoreType {
        self.store_type
    }

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.enter().await?;
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|rows| rows.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        self.enter().await?;
        let id = record.id()?;
        if self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unreachable(format!(
                "upsert of '{}' in {} dropped",
                id, table
            )));
        }
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), record.clone());
        self.journal.lock().push(JournalEntry::Upsert {
            table: table.to_string(),
            id,
        });
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        self.enter().await?;
        let existed = self
            .tables
            .lock()
            .get_mut(table)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false);
        self.journal.lock().push(JournalEntry::Delete {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(existed)
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        self.enter().await?;
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }
}
