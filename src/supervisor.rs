//! Owner of detached background work.
//!
//! Callers hand a future to [`TaskSupervisor::spawn`] and move on. A wrapper
//! task awaits it, logs errors and panics, and counts them so the status
//! snapshot can report background failures.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::SyncError;

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    failures: AtomicU64,
    idle: Notify,
}

#[derive(Clone, Default)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` in the background under supervision.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let name = name.into();
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(task);
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Background task '{}' failed: {}", name, e);
                }
                Err(e) if e.is_panic() => {
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Background task '{}' panicked", name);
                }
                Err(_) => {
                    tracing::debug!("Background task '{}' cancelled", name);
                }
            }

            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Failed or panicked tasks since startup.
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Resolves once no supervised task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
