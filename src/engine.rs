//! Cross-store synchronization algorithms.
//!
//! The engine knows four moves: push one record to the remote store, pull one
//! table into the local store, run a full push-then-pull sweep, and seed an
//! empty local store. Every table name goes through the [`TableRegistry`].
//!
//! Conflicts are settled per record. When both sides carry `updated_at` the
//! strictly newer copy wins; otherwise the write being applied wins.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SyncError;
use crate::mapping::{TableMapping, TableRegistry};
use crate::record::{Record, SyncOperation};
use crate::store::{Filter, StoreClient};

/// What a successful push did to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Written,
    /// `create` of an id the remote already has.
    AlreadyPresent,
    /// The remote copy is newer; nothing written.
    Stale,
    Deleted { existed: bool },
}

/// Result of pulling one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub synced: usize,
    pub failed: usize,
    /// Rows left alone because the local copy is newer.
    pub skipped: usize,
    /// Table-level failure (remote read), if any.
    pub error: Option<String>,
}

/// Result of a sweep, or of one half of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub local_to_remote: usize,
    pub remote_to_local: usize,
    pub errors: usize,
    /// Another sweep was in flight; this call did nothing.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
}

/// Read-only view of the engine's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub status: RunStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sweep_errors: usize,
    pub total_errors: u64,
}

#[derive(Debug)]
struct EngineState {
    status: RunStatus,
    last_sync_at: Option<DateTime<Utc>>,
    last_sweep_errors: usize,
    total_errors: u64,
    /// Newest remote `updated_at` applied per local table.
    pull_watermarks: HashMap<String, DateTime<Utc>>,
    /// Start of the last clean push pass per local table.
    push_watermarks: HashMap<String, DateTime<Utc>>,
}

pub struct SyncEngine {
    registry: Arc<TableRegistry>,
    local: Arc<dyn StoreClient>,
    remote: Arc<dyn StoreClient>,
    sweep_lock: tokio::sync::Mutex<()>,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<TableRegistry>,
        local: Arc<dyn StoreClient>,
        remote: Arc<dyn StoreClient>,
    ) -> Self {
        Self {
            registry,
            local,
            remote,
            sweep_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(EngineState {
                status: RunStatus::Idle,
                last_sync_at: None,
                last_sweep_errors: 0,
                total_errors: 0,
                pull_watermarks: HashMap::new(),
                push_watermarks: HashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock();
        EngineSnapshot {
            status: state.status,
            last_sync_at: state.last_sync_at,
            last_sweep_errors: state.last_sweep_errors,
            total_errors: state.total_errors,
        }
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_sync_at
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Pushes one record; logs and returns `false` on any failure.
    pub async fn sync_record_to_remote(
        &self,
        table: &str,
        operation: SyncOperation,
        record: &Record,
    ) -> bool {
        match self.try_sync_record_to_remote(table, operation, record).await {
            Ok(outcome) => {
                tracing::debug!("Pushed {} on '{}': {:?}", operation, table, outcome);
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Pushes one record to the remote table it maps to.
    ///
    /// `create` inserts unless the id exists, `update` upserts unless the
    /// remote copy is newer, `delete` removes by id.
    pub async fn try_sync_record_to_remote(
        &self,
        table: &str,
        operation: SyncOperation,
        record: &Record,
    ) -> Result<PushOutcome, SyncError> {
        let mapping = self.registry.resolve(table)?;
        if !mapping.direction.allows_push() {
            return Err(SyncError::Mapping(format!(
                "table '{}' is {} and cannot be pushed",
                mapping.local_name, mapping.direction
            )));
        }

        let id = record.id()?;
        let remote_table = mapping.remote_name.as_str();

        let result = match operation {
            SyncOperation::Create => self
                .remote
                .insert_if_absent(remote_table, record)
                .await
                .map(|inserted| {
                    if inserted {
                        PushOutcome::Written
                    } else {
                        PushOutcome::AlreadyPresent
                    }
                }),
            SyncOperation::Update => self.push_update(remote_table, &id, record).await,
            SyncOperation::Delete => self
                .remote
                .delete(remote_table, &id)
                .await
                .map(|existed| PushOutcome::Deleted { existed }),
        };

        match result {
            Ok(outcome) => {
                self.mark_synced();
                Ok(outcome)
            }
            Err(source) => {
                self.count_errors(1);
                Err(SyncError::Push {
                    table: remote_table.to_string(),
                    source,
                })
            }
        }
    }

    async fn push_update(
        &self,
        remote_table: &str,
        id: &str,
        record: &Record,
    ) -> Result<PushOutcome, crate::error::StoreError> {
        if record.updated_at().is_some() {
            if let Some(existing) = self.remote.get(remote_table, id).await? {
                if !existing.is_superseded_by(record) {
                    return Ok(PushOutcome::Stale);
                }
            }
        }
        self.remote.upsert(remote_table, record).await?;
        Ok(PushOutcome::Written)
    }

    /// Pushes every pushable table. Shares the sweep guard.
    pub async fn push_all(&self) -> SyncReport {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Sync already running; push skipped");
            return SyncReport::skipped();
        };
        self.set_status(RunStatus::Running);

        let mappings: Vec<TableMapping> = self.registry.pushable().cloned().collect();
        let (pushed, errors) = self.push_tables(&mappings).await;

        let report = SyncReport {
            local_to_remote: pushed,
            errors,
            ..SyncReport::default()
        };
        self.finish_sweep(&report);
        report
    }

    /// Pushes the locally authoritative tables only. Never pulls.
    pub async fn sync_auth_tables(&self) -> SyncReport {
        let mappings: Vec<TableMapping> = self.registry.auth_tables().cloned().collect();
        let (pushed, errors) = self.push_tables(&mappings).await;
        if pushed > 0 || errors > 0 {
            tracing::debug!("Auth sync: {} pushed, {} errors", pushed, errors);
        }
        SyncReport {
            local_to_remote: pushed,
            errors,
            ..SyncReport::default()
        }
    }

    async fn push_tables(&self, mappings: &[TableMapping]) -> (usize, usize) {
        let mut pushed = 0;
        let mut errors = 0;
        for mapping in mappings {
            let (p, e) = self.push_table(mapping).await;
            pushed += p;
            errors += e;
        }
        (pushed, errors)
    }

    async fn push_table(&self, mapping: &TableMapping) -> (usize, usize) {
        let started = Utc::now();
        let filter = match self.state.lock().push_watermarks.get(&mapping.local_name) {
            Some(since) => Filter::UpdatedSince(*since),
            None => Filter::All,
        };

        let rows = match self.local.find(&mapping.local_name, &filter).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Failed to read local table '{}': {}", mapping.local_name, e);
                self.count_errors(1);
                return (0, 1);
            }
        };

        let mut pushed = 0;
        let mut errors = 0;
        for row in &rows {
            match self
                .try_sync_record_to_remote(&mapping.local_name, SyncOperation::Update, row)
                .await
            {
                Ok(PushOutcome::Stale) => {}
                Ok(_) => pushed += 1,
                Err(e) => {
                    tracing::debug!("{}", e);
                    errors += 1;
                }
            }
        }

        if errors == 0 {
            self.state
                .lock()
                .push_watermarks
                .insert(mapping.local_name.clone(), started);
        } else {
            tracing::warn!(
                "Push of '{}' finished with {} error(s)",
                mapping.local_name,
                errors
            );
        }
        (pushed, errors)
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    /// Pulls the freshest remote state of one table into the local store.
    ///
    /// Tables that may not be pulled return an empty report without touching
    /// the local store. Failures are logged and reported, never raised.
    pub async fn pull_table_from_remote(&self, table: &str) -> PullReport {
        match self.try_pull_table_from_remote(table).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("{}", e);
                PullReport {
                    error: Some(e.to_string()),
                    ..PullReport::default()
                }
            }
        }
    }

    /// Incremental pull past the table's watermark.
    pub async fn try_pull_table_from_remote(&self, table: &str) -> Result<PullReport, SyncError> {
        let mapping = self.registry.resolve(table)?.clone();
        if !mapping.direction.allows_pull() {
            tracing::debug!(
                "Skipping pull of '{}' ({})",
                mapping.local_name,
                mapping.direction
            );
            return Ok(PullReport::default());
        }
        self.pull_mapping(&mapping, true).await
    }

    /// Pulls every pullable table in full. Shares the sweep guard.
    pub async fn pull_all(&self) -> SyncReport {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Sync already running; pull skipped");
            return SyncReport::skipped();
        };
        self.set_status(RunStatus::Running);

        let (pulled, errors) = self.pull_tables().await;
        let report = SyncReport {
            remote_to_local: pulled,
            errors,
            ..SyncReport::default()
        };
        self.finish_sweep(&report);
        report
    }

    async fn pull_tables(&self) -> (usize, usize) {
        let mappings: Vec<TableMapping> = self.registry.pullable().cloned().collect();
        let mut pulled = 0;
        let mut errors = 0;
        for mapping in &mappings {
            match self.pull_mapping(mapping, false).await {
                Ok(report) => {
                    pulled += report.synced;
                    errors += report.failed;
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    errors += 1;
                }
            }
        }
        (pulled, errors)
    }

    async fn pull_mapping(
        &self,
        mapping: &TableMapping,
        incremental: bool,
    ) -> Result<PullReport, SyncError> {
        // Registry is the only gate; re-checked here so no path can bypass it.
        if !mapping.direction.allows_pull() {
            return Ok(PullReport::default());
        }

        let watermark = if incremental {
            self.state
                .lock()
                .pull_watermarks
                .get(&mapping.local_name)
                .copied()
        } else {
            None
        };
        let filter = match watermark {
            Some(since) => Filter::UpdatedSince(since),
            None => Filter::All,
        };

        let rows = match self.remote.find(&mapping.remote_name, &filter).await {
            Ok(rows) => rows,
            Err(source) => {
                self.count_errors(1);
                return Err(SyncError::Pull {
                    table: mapping.remote_name.clone(),
                    source,
                });
            }
        };

        let local_table = mapping.local_name.as_str();
        let mut report = PullReport::default();
        let mut newest: Option<DateTime<Utc>> = None;

        for row in rows {
            let id = match row.id() {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping remote row in '{}': {}", mapping.remote_name, e);
                    report.failed += 1;
                    continue;
                }
            };
            if let Some(ts) = row.updated_at() {
                newest = Some(newest.map_or(ts, |n| n.max(ts)));
            }

            if row.is_tombstone() {
                match self.local.delete(local_table, &id).await {
                    Ok(true) => report.synced += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!("Failed to delete '{}' {}: {}", local_table, id, e);
                        report.failed += 1;
                    }
                }
                continue;
            }

            match self.local.get(local_table, &id).await {
                Ok(Some(existing)) if !existing.is_superseded_by(&row) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to read '{}' {}: {}", local_table, id, e);
                    report.failed += 1;
                    continue;
                }
            }

            match self.local.upsert(local_table, &row).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    tracing::warn!("Failed to write '{}' {}: {}", local_table, id, e);
                    report.failed += 1;
                }
            }
        }

        {
            let mut state = self.state.lock();
            if report.failed == 0 {
                if let Some(ts) = newest {
                    let entry = state
                        .pull_watermarks
                        .entry(mapping.local_name.clone())
                        .or_insert(ts);
                    *entry = (*entry).max(ts);
                }
                state.last_sync_at = Some(Utc::now());
            } else {
                state.total_errors += report.failed as u64;
            }
        }

        if report.synced > 0 || report.failed > 0 {
            tracing::debug!(
                "Pulled '{}': {} synced, {} failed, {} skipped",
                mapping.remote_name,
                report.synced,
                report.failed,
                report.skipped
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------

    /// Pushes every pushable table, then pulls every pullable table in full.
    ///
    /// At most one sweep runs at a time; an overlapping call returns a
    /// report with `skipped` set and zero counts.
    pub async fn bidirectional_sync(&self) -> SyncReport {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Bidirectional sync already running; skipped");
            return SyncReport::skipped();
        };
        self.set_status(RunStatus::Running);
        tracing::debug!("Bidirectional sync started");

        let mappings: Vec<TableMapping> = self.registry.pushable().cloned().collect();
        let (pushed, push_errors) = self.push_tables(&mappings).await;
        let (pulled, pull_errors) = self.pull_tables().await;

        let report = SyncReport {
            local_to_remote: pushed,
            remote_to_local: pulled,
            errors: push_errors + pull_errors,
            skipped: false,
        };
        self.finish_sweep(&report);

        tracing::info!(
            "Bidirectional sync: {} pushed, {} pulled, {} errors",
            report.local_to_remote,
            report.remote_to_local,
            report.errors
        );
        report
    }

    pub fn is_running(&self) -> bool {
        self.sweep_lock.try_lock().is_err()
    }

    /// Seeds an empty local store from the remote store.
    ///
    /// Only pullable tables are counted and seeded. Returns `true` when the
    /// local store is healthy and either already held data or was seeded
    /// without errors. Safe to call on every startup.
    pub async fn initialize_database(&self) -> bool {
        let mut total = 0;
        for mapping in self.registry.pullable() {
            match self.local.count(&mapping.local_name).await {
                Ok(count) => total += count,
                Err(e) => {
                    tracing::error!("Local store is not usable: {}", e);
                    return false;
                }
            }
        }

        if total > 0 {
            tracing::debug!("Local store holds {} row(s); no seeding needed", total);
            return true;
        }

        tracing::info!("Local store is empty; seeding from remote store");
        if let Err(e) = self.remote.ping().await {
            tracing::warn!("Cannot seed local store, remote unreachable: {}", e);
            return false;
        }

        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Sync already running; seeding deferred");
            return false;
        };
        self.set_status(RunStatus::Running);

        let (pulled, errors) = self.pull_tables().await;
        let report = SyncReport {
            remote_to_local: pulled,
            errors,
            ..SyncReport::default()
        };
        self.finish_sweep(&report);

        tracing::info!("Seeded {} row(s) from remote ({} errors)", pulled, errors);
        errors == 0
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn set_status(&self, status: RunStatus) {
        self.state.lock().status = status;
    }

    fn finish_sweep(&self, report: &SyncReport) {
        let mut state = self.state.lock();
        state.status = RunStatus::Idle;
        state.last_sweep_errors = report.errors;
        if report.errors == 0 {
            state.last_sync_at = Some(Utc::now());
        }
    }

    fn mark_synced(&self) {
        self.state.lock().last_sync_at = Some(Utc::now());
    }

    fn count_errors(&self, count: u64) {
        self.state.lock().total_errors += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SyncDirection;
    use crate::store::{JournalEntry, MemoryStore, StoreType};
    use chrono::TimeZone;
    use std::time::Duration;

    struct TestContext {
        local: Arc<MemoryStore>,
        remote: Arc<MemoryStore>,
        engine: Arc<SyncEngine>,
    }

    fn setup() -> TestContext {
        let local = Arc::new(MemoryStore::new(StoreType::Local));
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let engine = Arc::new(SyncEngine::new(
            Arc::new(TableRegistry::pharmacy_default().unwrap()),
            local.clone(),
            remote.clone(),
        ));
        TestContext {
            local,
            remote,
            engine,
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_push_maps_to_remote_table() {
        let ctx = setup();
        let record = Record::new().with("id", "p1").with("name", "Aspirin");

        assert!(
            ctx.engine
                .sync_record_to_remote("product", SyncOperation::Create, &record)
                .await
        );
        assert_eq!(ctx.remote.rows("products"), vec![record]);
        assert!(ctx.remote.rows("product").is_empty());
    }

    #[tokio::test]
    async fn test_create_is_insert_or_ignore() {
        let ctx = setup();
        let first = Record::new().with("id", "p1").with("name", "Aspirin");
        let second = Record::new().with("id", "p1").with("name", "Other");

        let engine = &ctx.engine;
        assert_eq!(
            engine
                .try_sync_record_to_remote("product", SyncOperation::Create, &first)
                .await
                .unwrap(),
            PushOutcome::Written
        );
        assert_eq!(
            engine
                .try_sync_record_to_remote("product", SyncOperation::Create, &second)
                .await
                .unwrap(),
            PushOutcome::AlreadyPresent
        );
        assert_eq!(ctx.remote.rows("products"), vec![first]);
    }

    #[tokio::test]
    async fn test_update_skips_when_remote_newer() {
        let ctx = setup();
        let newer = Record::new()
            .with("id", "c1")
            .with("name", "Remote")
            .with("updated_at", at(10));
        ctx.remote.upsert("customers", &newer).await.unwrap();

        let stale = Record::new()
            .with("id", "c1")
            .with("name", "Local")
            .with("updated_at", at(2));
        let outcome = ctx
            .engine
            .try_sync_record_to_remote("customer", SyncOperation::Update, &stale)
            .await
            .unwrap();

        assert_eq!(outcome, PushOutcome::Stale);
        assert_eq!(ctx.remote.rows("customers"), vec![newer]);
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let ctx = setup();
        let record = Record::new().with("id", "b1");
        ctx.remote.upsert("batches", &record).await.unwrap();

        let outcome = ctx
            .engine
            .try_sync_record_to_remote("batch", SyncOperation::Delete, &record)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Deleted { existed: true });
        assert!(ctx.remote.rows("batches").is_empty());
    }

    #[tokio::test]
    async fn test_push_failures_return_false() {
        let ctx = setup();
        let record = Record::new().with("id", "p1");

        // Unknown table
        assert!(
            !ctx.engine
                .sync_record_to_remote("invoice", SyncOperation::Create, &record)
                .await
        );
        // Wrong direction
        let err = ctx
            .engine
            .try_sync_record_to_remote("tax_rate", SyncOperation::Update, &record)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Mapping(_)));
        // Missing id
        let err = ctx
            .engine
            .try_sync_record_to_remote("product", SyncOperation::Create, &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord(_)));
        // Remote down
        ctx.remote.set_reachable(false);
        let err = ctx
            .engine
            .try_sync_record_to_remote("product", SyncOperation::Create, &record)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Push { .. }));
        assert!(err.is_retryable());
        assert!(ctx.engine.snapshot().total_errors >= 1);
    }

    #[tokio::test]
    async fn test_pull_upserts_and_never_deletes_absent_rows() {
        let ctx = setup();
        let local_only = Record::new().with("id", "p9").with("name", "Local only");
        ctx.local.upsert("product", &local_only).await.unwrap();
        ctx.local
            .upsert("product", &Record::new().with("id", "p1").with("name", "Old"))
            .await
            .unwrap();

        let fresh = Record::new().with("id", "p1").with("name", "New");
        let added = Record::new().with("id", "p2").with("name", "Added");
        ctx.remote.upsert("products", &fresh).await.unwrap();
        ctx.remote.upsert("products", &added).await.unwrap();

        let report = ctx.engine.pull_table_from_remote("product").await;
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(ctx.local.rows("product"), vec![fresh, added, local_only]);
    }

    #[tokio::test]
    async fn test_pull_applies_tombstones() {
        let ctx = setup();
        ctx.local
            .upsert("sale", &Record::new().with("id", "s1"))
            .await
            .unwrap();
        ctx.remote
            .upsert("sales", &Record::new().with("id", "s1").with("_deleted", true))
            .await
            .unwrap();

        let report = ctx.engine.pull_table_from_remote("sale").await;
        assert_eq!(report.synced, 1);
        assert!(ctx.local.rows("sale").is_empty());
    }

    #[tokio::test]
    async fn test_pull_keeps_newer_local_copy() {
        let ctx = setup();
        let local = Record::new()
            .with("id", "c1")
            .with("name", "Local")
            .with("updated_at", at(20));
        ctx.local.upsert("customer", &local).await.unwrap();
        ctx.remote
            .upsert(
                "customers",
                &Record::new()
                    .with("id", "c1")
                    .with("name", "Remote")
                    .with("updated_at", at(1)),
            )
            .await
            .unwrap();

        let report = ctx.engine.pull_table_from_remote("customer").await;
        assert_eq!(report.skipped, 1);
        assert_eq!(ctx.local.rows("customer"), vec![local]);
    }

    #[tokio::test]
    async fn test_pull_excluded_never_writes_locally() {
        let ctx = setup();
        let local_user = Record::new().with("id", "u1").with("password_hash", "local");
        ctx.local.upsert("user", &local_user).await.unwrap();
        ctx.local.clear_journal();
        ctx.remote
            .upsert(
                "users",
                &Record::new().with("id", "u1").with("password_hash", "stale"),
            )
            .await
            .unwrap();
        ctx.remote
            .upsert("users", &Record::new().with("id", "u2"))
            .await
            .unwrap();

        for _ in 0..3 {
            let report = ctx.engine.pull_table_from_remote("user").await;
            assert_eq!((report.synced, report.failed), (0, 0));
        }
        ctx.engine.bidirectional_sync().await;
        ctx.engine.pull_all().await;

        assert!(ctx.local.journal().is_empty());
        assert_eq!(ctx.local.rows("user"), vec![local_user]);
    }

    #[tokio::test]
    async fn test_push_then_pull_round_trip() {
        let ctx = setup();
        let record = Record::new()
            .with("id", "s7")
            .with("name", "Acme Pharma")
            .with("phone", "555-0100")
            .with("updated_at", at(3));

        assert!(
            ctx.engine
                .sync_record_to_remote("supplier", SyncOperation::Create, &record)
                .await
        );
        ctx.engine.pull_table_from_remote("supplier").await;
        assert_eq!(ctx.local.rows("supplier"), vec![record]);
    }

    #[tokio::test]
    async fn test_push_only_table_is_not_pulled_back() {
        let ctx = setup();
        let entry = Record::new().with("id", "a1").with("action", "login");

        assert!(
            ctx.engine
                .sync_record_to_remote("audit_log", SyncOperation::Create, &entry)
                .await
        );
        assert_eq!(ctx.remote.rows("audit_logs"), vec![entry]);

        let report = ctx.engine.pull_table_from_remote("audit_log").await;
        assert_eq!(report, PullReport::default());
        assert!(ctx.local.rows("audit_log").is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_is_reported_not_raised() {
        let ctx = setup();
        ctx.remote.set_reachable(false);
        let report = ctx.engine.pull_table_from_remote("product").await;
        assert_eq!(report.synced, 0);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_incremental_pull_uses_watermark() {
        let ctx = setup();
        ctx.remote
            .upsert(
                "products",
                &Record::new().with("id", "p1").with("updated_at", at(1)),
            )
            .await
            .unwrap();
        assert_eq!(ctx.engine.pull_table_from_remote("product").await.synced, 1);

        ctx.remote
            .upsert(
                "products",
                &Record::new().with("id", "p2").with("updated_at", at(2)),
            )
            .await
            .unwrap();
        // Only the row past the watermark comes back
        assert_eq!(ctx.engine.pull_table_from_remote("product").await.synced, 1);
        assert_eq!(ctx.local.rows("product").len(), 2);
    }

    #[tokio::test]
    async fn test_bidirectional_sync_pushes_then_pulls() {
        let ctx = setup();
        ctx.local
            .upsert("product", &Record::new().with("id", "p1").with("name", "Local"))
            .await
            .unwrap();
        ctx.remote
            .upsert("customers", &Record::new().with("id", "c1"))
            .await
            .unwrap();
        ctx.remote
            .upsert("tax_rates", &Record::new().with("id", "vat").with("rate", 0.2))
            .await
            .unwrap();

        let report = ctx.engine.bidirectional_sync().await;
        assert!(!report.skipped);
        assert_eq!(report.errors, 0);
        assert_eq!(report.local_to_remote, 1);
        // p1 comes back too, plus c1 and the pull-only tax rate
        assert_eq!(report.remote_to_local, 3);
        assert_eq!(ctx.remote.rows("products").len(), 1);
        assert_eq!(ctx.local.rows("customer").len(), 1);
        assert_eq!(ctx.local.rows("tax_rate").len(), 1);
        assert!(ctx.engine.last_sync_at().is_some());
        assert_eq!(ctx.engine.snapshot().status, RunStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sweeps_run_once() {
        let ctx = setup();
        for i in 0..3 {
            ctx.local
                .upsert("product", &Record::new().with("id", format!("p{}", i)))
                .await
                .unwrap();
        }
        ctx.remote.set_latency(Some(Duration::from_millis(50)));

        let (first, second) = tokio::join!(
            ctx.engine.bidirectional_sync(),
            ctx.engine.bidirectional_sync()
        );

        let (ran, skipped) = if first.skipped {
            (second, first)
        } else {
            (first, second)
        };
        assert!(!ran.skipped);
        assert_eq!(ran.local_to_remote, 3);
        assert!(skipped.skipped);
        assert_eq!(skipped.local_to_remote + skipped.remote_to_local, 0);

        let upserts = ctx
            .remote
            .journal()
            .into_iter()
            .filter(|e| matches!(e, JournalEntry::Upsert { .. }))
            .count();
        assert_eq!(upserts, 3);
    }

    #[tokio::test]
    async fn test_second_push_pass_is_incremental() {
        let ctx = setup();
        ctx.local
            .upsert(
                "product",
                &Record::new().with("id", "p1").with("updated_at", at(1)),
            )
            .await
            .unwrap();

        assert_eq!(ctx.engine.push_all().await.local_to_remote, 1);
        // Nothing changed locally since the last clean pass
        assert_eq!(ctx.engine.push_all().await.local_to_remote, 0);
    }

    #[tokio::test]
    async fn test_auth_sync_pushes_users_only() {
        let ctx = setup();
        ctx.local
            .upsert("user", &Record::new().with("id", "u1"))
            .await
            .unwrap();
        ctx.local
            .upsert("product", &Record::new().with("id", "p1"))
            .await
            .unwrap();

        let report = ctx.engine.sync_auth_tables().await;
        assert_eq!(report.local_to_remote, 1);
        assert_eq!(report.remote_to_local, 0);
        assert_eq!(ctx.remote.rows("users").len(), 1);
        assert!(ctx.remote.rows("products").is_empty());
    }

    #[tokio::test]
    async fn test_initialize_seeds_empty_local_store() {
        let ctx = setup();
        ctx.remote
            .upsert("products", &Record::new().with("id", "p1"))
            .await
            .unwrap();
        ctx.remote
            .upsert("users", &Record::new().with("id", "u1"))
            .await
            .unwrap();

        assert!(ctx.engine.initialize_database().await);
        assert_eq!(ctx.local.rows("product").len(), 1);
        // Locally authoritative tables are never seeded from remote
        assert!(ctx.local.rows("user").is_empty());

        // Second call is a no-op
        ctx.local.clear_journal();
        assert!(ctx.engine.initialize_database().await);
        assert!(ctx.local.journal().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_offline_with_empty_store_fails() {
        let ctx = setup();
        ctx.remote.set_reachable(false);
        assert!(!ctx.engine.initialize_database().await);
    }

    #[tokio::test]
    async fn test_custom_registry_directions() {
        let local = Arc::new(MemoryStore::new(StoreType::Local));
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let registry = TableRegistry::new(vec![TableMapping::new(
            "staff",
            "branch_staff",
            SyncDirection::PullExcluded,
        )])
        .unwrap();
        let engine = SyncEngine::new(Arc::new(registry), local.clone(), remote.clone());

        remote
            .upsert("branch_staff", &Record::new().with("id", "s1"))
            .await
            .unwrap();
        assert_eq!(
            engine.pull_table_from_remote("staff").await,
            PullReport::default()
        );
        assert!(local.rows("staff").is_empty());
    }
}
