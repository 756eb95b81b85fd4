//! Background sync loops.
//!
//! The scheduler owns every timer: the connectivity probe, the reaction to
//! connectivity edges, the backup sweep, the fast auth-table push, and the
//! watchdog. All of them run under the [`TaskSupervisor`] and stop together
//! on [`SchedulerHandle::shutdown`].

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::engine::SyncEngine;
use crate::queue::SyncQueue;
use crate::supervisor::TaskSupervisor;

/// Loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub connectivity_interval: Duration,
    pub backup_interval: Duration,
    pub auth_interval: Duration,
    pub watchdog_interval: Duration,
    /// A sweep is forced when the last successful sync is older than this.
    pub watchdog_threshold: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            connectivity_interval: Duration::from_secs(30),
            backup_interval: Duration::from_secs(300),
            auth_interval: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(1800),
            watchdog_threshold: Duration::from_secs(3600),
        }
    }
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    queue: Arc<SyncQueue>,
    monitor: Arc<ConnectivityMonitor>,
    supervisor: TaskSupervisor,
    schedule: Schedule,
}

/// Stops the loops started by [`Scheduler::start`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals every loop and waits for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("Sync scheduler stopped");
    }
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectivityMonitor>,
        supervisor: TaskSupervisor,
        schedule: Schedule,
    ) -> Self {
        Self {
            engine,
            queue,
            monitor,
            supervisor,
            schedule,
        }
    }

    pub fn start(&self) -> SchedulerHandle {
        let (shutdown, stop) = watch::channel(false);
        // Subscribe before the first probe so the startup edge is seen.
        // An edge crossed before this point is replayed by the listener.
        let transitions = self.monitor.subscribe();
        let already_online = self.monitor.is_online();

        let mut tasks = Vec::new();
        tasks.push(self.spawn_transition_listener(
            transitions,
            already_online,
            stop.clone(),
        ));

        tasks.push(self.monitor.start_monitoring(
            self.schedule.connectivity_interval,
            &self.supervisor,
            stop.clone(),
        ));

        let (engine, queue, monitor) = self.shared();
        tasks.push(self.spawn_periodic(
            "backup",
            self.schedule.backup_interval,
            stop.clone(),
            move || {
                let (engine, queue, monitor) = (engine.clone(), queue.clone(), monitor.clone());
                async move {
                    if !monitor.is_online() {
                        return;
                    }
                    if !queue.is_empty() {
                        queue.drain_queue(&engine).await;
                    }
                    engine.bidirectional_sync().await;
                }
            },
        ));

        let (engine, _, monitor) = self.shared();
        tasks.push(self.spawn_periodic(
            "auth",
            self.schedule.auth_interval,
            stop.clone(),
            move || {
                let (engine, monitor) = (engine.clone(), monitor.clone());
                async move {
                    if monitor.is_online() {
                        engine.sync_auth_tables().await;
                    }
                }
            },
        ));

        let (engine, _, monitor) = self.shared();
        let threshold = self.schedule.watchdog_threshold;
        tasks.push(self.spawn_periodic(
            "watchdog",
            self.schedule.watchdog_interval,
            stop,
            move || {
                let (engine, monitor) = (engine.clone(), monitor.clone());
                async move {
                    if !monitor.is_online() {
                        return;
                    }
                    let stale = match engine.last_sync_at() {
                        Some(last) => (Utc::now() - last)
                            .to_std()
                            .map(|age| age > threshold)
                            .unwrap_or(false),
                        None => true,
                    };
                    if stale {
                        tracing::warn!("No successful sync within {:?}; forcing sweep", threshold);
                        engine.bidirectional_sync().await;
                    }
                }
            },
        ));

        tracing::info!(
            "Sync scheduler started (probe every {:?}, backup every {:?})",
            self.schedule.connectivity_interval,
            self.schedule.backup_interval
        );
        SchedulerHandle { shutdown, tasks }
    }

    fn shared(&self) -> (Arc<SyncEngine>, Arc<SyncQueue>, Arc<ConnectivityMonitor>) {
        (
            Arc::clone(&self.engine),
            Arc::clone(&self.queue),
            Arc::clone(&self.monitor),
        )
    }

    fn spawn_transition_listener(
        &self,
        mut transitions: broadcast::Receiver<Transition>,
        already_online: bool,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let (engine, queue, _) = self.shared();
        self.supervisor.spawn("transitions", async move {
            if already_online {
                tracing::debug!("Remote store already reachable at startup");
                catch_up(&engine, &queue).await;
            }

            loop {
                let transition = tokio::select! {
                    _ = stop.changed() => break,
                    received = transitions.recv() => match received {
                        Ok(transition) => transition,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::debug!("Missed {} connectivity transition(s)", missed);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                match transition {
                    Transition::Reconnected => catch_up(&engine, &queue).await,
                    Transition::Disconnected => {
                        // Best effort; whatever fails stays local
                        engine.bidirectional_sync().await;
                    }
                }
            }
            Ok(())
        })
    }

    fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut stop: watch::Receiver<bool>,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.supervisor.spawn(name, async move {
            // First tick one period from now
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::debug!("Stopped '{}' loop", name);
            Ok(())
        })
    }
}

/// Replays the queue, then sweeps.
async fn catch_up(engine: &SyncEngine, queue: &SyncQueue) {
    // Queued deletes must land before the pull pass runs
    queue.drain_queue(engine).await;
    engine.bidirectional_sync().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::SyncHook;
    use crate::mapping::TableRegistry;
    use crate::queue::QueueLimits;
    use crate::record::{Record, SyncOperation};
    use crate::store::{MemoryStore, StoreClient, StoreType};

    struct TestContext {
        local: Arc<MemoryStore>,
        remote: Arc<MemoryStore>,
        engine: Arc<SyncEngine>,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectivityMonitor>,
        supervisor: TaskSupervisor,
    }

    impl TestContext {
        fn scheduler(&self, schedule: Schedule) -> Scheduler {
            Scheduler::new(
                self.engine.clone(),
                self.queue.clone(),
                self.monitor.clone(),
                self.supervisor.clone(),
                schedule,
            )
        }
    }

    fn setup() -> TestContext {
        let local = Arc::new(MemoryStore::new(StoreType::Local));
        let remote = Arc::new(MemoryStore::new(StoreType::Remote));
        let engine = Arc::new(SyncEngine::new(
            Arc::new(TableRegistry::pharmacy_default().unwrap()),
            local.clone(),
            remote.clone(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            Duration::from_secs(2),
        ));
        TestContext {
            local,
            remote,
            engine,
            queue: Arc::new(SyncQueue::new(QueueLimits::default())),
            monitor,
            supervisor: TaskSupervisor::new(),
        }
    }

    fn quiet_schedule() -> Schedule {
        let long = Duration::from_secs(100_000);
        Schedule {
            connectivity_interval: Duration::from_secs(1),
            backup_interval: long,
            auth_interval: long,
            watchdog_interval: long,
            watchdog_threshold: long,
        }
    }

    async fn settle_until(mut done: impl FnMut() -> bool) {
        for _ in 0..50 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_write_drains_after_reconnect() {
        let ctx = setup();
        let hook = SyncHook::new(
            ctx.engine.clone(),
            ctx.queue.clone(),
            ctx.monitor.clone(),
            ctx.supervisor.clone(),
        );

        ctx.remote.set_reachable(false);
        ctx.monitor.check_connectivity().await;
        let handle = ctx.scheduler(quiet_schedule()).start();

        let aspirin = Record::new().with("id", "p1").with("name", "Aspirin");
        assert!(
            !hook
                .sync_after_operation("product", SyncOperation::Create, aspirin.clone())
                .await
        );
        assert_eq!(ctx.queue.len(), 1);

        ctx.remote.set_reachable(true);
        settle_until(|| ctx.queue.is_empty()).await;

        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.remote.rows("products"), vec![aspirin]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_first_check_still_drains() {
        let ctx = setup();
        let ibuprofen = Record::new().with("id", "p2").with("name", "Ibuprofen");
        ctx.queue
            .add_to_queue("product", SyncOperation::Create, ibuprofen.clone());

        // Probe and seed first, the way the run command starts up
        ctx.monitor.check_connectivity().await;
        assert!(ctx.engine.initialize_database().await);
        let handle = ctx.scheduler(quiet_schedule()).start();

        settle_until(|| ctx.queue.is_empty()).await;
        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.remote.rows("products"), vec![ibuprofen]);
        assert!(ctx.engine.last_sync_at().is_some());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_loop_pushes_without_pulling() {
        let ctx = setup();
        ctx.monitor.check_connectivity().await;

        let schedule = Schedule {
            auth_interval: Duration::from_secs(5),
            ..quiet_schedule()
        };
        let handle = ctx.scheduler(schedule).start();
        settle_until(|| ctx.engine.last_sync_at().is_some()).await;

        ctx.local
            .upsert("user", &Record::new().with("id", "u1"))
            .await
            .unwrap();
        ctx.remote
            .upsert("users", &Record::new().with("id", "u2"))
            .await
            .unwrap();
        ctx.local.clear_journal();

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle_until(|| ctx.remote.rows("users").len() == 2).await;

        assert_eq!(ctx.remote.rows("users").len(), 2);
        assert!(ctx.local.journal().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_forces_sweep_when_stale() {
        let ctx = setup();
        ctx.monitor.check_connectivity().await;

        let schedule = Schedule {
            watchdog_interval: Duration::from_secs(10),
            watchdog_threshold: Duration::ZERO,
            ..quiet_schedule()
        };
        let handle = ctx.scheduler(schedule).start();
        settle_until(|| ctx.engine.last_sync_at().is_some()).await;

        // Only a sweep brings this row down; the backup loop is idle
        ctx.remote
            .upsert("products", &Record::new().with("id", "p1"))
            .await
            .unwrap();
        assert!(ctx.local.rows("product").is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle_until(|| ctx.local.rows("product").len() == 1).await;

        assert_eq!(ctx.local.rows("product").len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_loop() {
        let ctx = setup();
        let handle = ctx.scheduler(Schedule::default()).start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.shutdown().await;
        ctx.supervisor.wait_idle().await;
        assert_eq!(ctx.supervisor.in_flight(), 0);
        assert_eq!(ctx.supervisor.failure_count(), 0);
    }
}
