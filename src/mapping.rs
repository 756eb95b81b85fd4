//! Table mapping registry.
//!
//! The registry is the only place that knows which remote table a local
//! table corresponds to and in which direction its data may flow. Every push
//! and pull path resolves its table through [`TableRegistry::resolve`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::SyncError;

/// Which way a table's data is allowed to flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Pushed to remote and pulled back.
    Bidirectional,
    /// Produced locally; pushed, never pulled.
    PushOnly,
    /// Locally authoritative (credentials). Pushed, never overwritten from remote.
    PullExcluded,
    /// Maintained centrally; pulled, never pushed.
    PullOnly,
}

impl SyncDirection {
    pub fn allows_push(self) -> bool {
        !matches!(self, SyncDirection::PullOnly)
    }

    pub fn allows_pull(self) -> bool {
        matches!(self, SyncDirection::Bidirectional | SyncDirection::PullOnly)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
            SyncDirection::PushOnly => write!(f, "push_only"),
            SyncDirection::PullExcluded => write!(f, "pull_excluded"),
            SyncDirection::PullOnly => write!(f, "pull_only"),
        }
    }
}

/// Binding between a local table and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub local_name: String,
    pub remote_name: String,
    pub direction: SyncDirection,
}

impl TableMapping {
    pub fn new(
        local_name: impl Into<String>,
        remote_name: impl Into<String>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            remote_name: remote_name.into(),
            direction,
        }
    }
}

/// Immutable set of table mappings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    mappings: Vec<TableMapping>,
    by_local: HashMap<String, usize>,
    by_remote: HashMap<String, usize>,
}

impl TableRegistry {
    /// Builds a registry, rejecting duplicate local or remote names.
    pub fn new(mappings: Vec<TableMapping>) -> Result<Self, SyncError> {
        let mut by_local = HashMap::new();
        let mut by_remote = HashMap::new();

        for (index, mapping) in mappings.iter().enumerate() {
            if by_local.insert(mapping.local_name.clone(), index).is_some() {
                return Err(SyncError::Mapping(format!(
                    "duplicate local table '{}'",
                    mapping.local_name
                )));
            }
            if by_remote.insert(mapping.remote_name.clone(), index).is_some() {
                return Err(SyncError::Mapping(format!(
                    "duplicate remote table '{}'",
                    mapping.remote_name
                )));
            }
        }

        Ok(Self {
            mappings,
            by_local,
            by_remote,
        })
    }

    /// The tables of the pharmacy backend.
    pub fn pharmacy_default() -> Result<Self, SyncError> {
        use SyncDirection::*;

        Self::new(vec![
            TableMapping::new("user", "users", PullExcluded),
            TableMapping::new("product", "products", Bidirectional),
            TableMapping::new("category", "categories", Bidirectional),
            TableMapping::new("customer", "customers", Bidirectional),
            TableMapping::new("supplier", "suppliers", Bidirectional),
            TableMapping::new("batch", "batches", Bidirectional),
            TableMapping::new("purchase", "purchases", Bidirectional),
            TableMapping::new("sale", "sales", Bidirectional),
            TableMapping::new("sale_item", "sale_items", Bidirectional),
            TableMapping::new("audit_log", "audit_logs", PushOnly),
            TableMapping::new("tax_rate", "tax_rates", PullOnly),
        ])
    }

    /// Looks up a table by local name, falling back to remote name.
    pub fn resolve(&self, table: &str) -> Result<&TableMapping, SyncError> {
        self.by_local
            .get(table)
            .or_else(|| self.by_remote.get(table))
            .map(|&index| &self.mappings[index])
            .ok_or_else(|| SyncError::Mapping(format!("no mapping registered for table '{}'", table)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter()
    }

    pub fn pushable(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter().filter(|m| m.direction.allows_push())
    }

    pub fn pullable(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter().filter(|m| m.direction.allows_pull())
    }

    /// Locally authoritative tables, pushed by the fast auth sync.
    pub fn auth_tables(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings
            .iter()
            .filter(|m| m.direction == SyncDirection::PullExcluded)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
