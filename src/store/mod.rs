//! Uniform client interface over the local and remote stores.
//!
//! Both stores satisfy the same table-name-parameterized CRUD contract so the
//! sync engine never cares which engine sits behind a handle.

mod http;
mod memory;
mod sqlite;

pub use http::HttpStore;
pub use memory::{JournalEntry, MemoryStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;
use crate::record::Record;

/// Which backing store a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Local,
    Remote,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Local => write!(f, "local"),
            StoreType::Remote => write!(f, "remote"),
        }
    }
}

/// Row selection for [`StoreClient::find`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    ById(String),
    /// Rows modified strictly after the instant, plus rows with no `updated_at`.
    UpdatedSince(DateTime<Utc>),
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::ById(id) => record.id().map(|rid| &rid == id).unwrap_or(false),
            Filter::UpdatedSince(since) => match record.updated_at() {
                Some(ts) => ts > *since,
                None => true,
            },
        }
    }
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    fn store_type(&self) -> StoreType;

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Inserts or replaces the row keyed by the record's id.
    async fn upsert(&self, table: &str, record: &Record) -> Result<(), StoreError>;

    /// Deletes a row; returns whether it existed.
    async fn delete(&self, table: &str, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, table: &str) -> Result<u64, StoreError>;

    /// Cheapest possible round trip, used as the reachability probe.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let mut rows = self.find(table, &Filter::ById(id.to_string())).await?;
        Ok(rows.pop())
    }

    /// Insert-or-ignore. Returns `false` when a row with the same id exists.
    async fn insert_if_absent(&self, table: &str, record: &Record) -> Result<bool, StoreError> {
        let id = record.id()?;
        if self.get(table, &id).await?.is_some() {
            return Ok(false);
        }
        self.upsert(table, record).await?;
        Ok(true)
    }
}
