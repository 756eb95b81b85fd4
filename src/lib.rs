//! Offline-first synchronization between an embedded local store and a
//! shared remote store.
//!
//! Writes land locally first. The [`hook::SyncHook`] pushes them to the
//! remote store when it is reachable and queues them when it is not; the
//! [`scheduler::Scheduler`] drains the queue and runs sweeps as connectivity
//! comes and goes. [`service::SyncService`] wires it all together.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod hook;
pub mod mapping;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod selector;
pub mod server;
pub mod service;
pub mod store;
pub mod supervisor;

pub use connectivity::{ConnectivityMonitor, ConnectivityStatus, Transition};
pub use engine::{PullReport, PushOutcome, SyncEngine, SyncReport};
pub use error::{StoreError, SyncError};
pub use mapping::{SyncDirection, TableMapping, TableRegistry};
pub use queue::{QueueEntry, SyncQueue};
pub use record::{FieldValue, Record, SyncOperation};
pub use selector::{DatabaseSelector, StoreMode};
pub use service::{SyncService, SyncStatusSnapshot};
pub use store::{StoreClient, StoreType};
