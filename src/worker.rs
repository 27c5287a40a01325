//! In-process worker pool for background tasks.
//!
//! A bounded `mpsc` queue drained by a fixed number of tokio tasks that
//! share one receiver. [`WorkerPool::dispatch`] never waits: when the queue
//! is full the task is dropped and counted, so a burst of mutations cannot
//! stall request handlers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

use anchor_feed_core::tasks::{BackgroundTask, TaskDispatcher, TaskHandler};

use crate::config::WorkersConfig;

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum queued tasks
    pub max_queue_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1024,
        }
    }
}

impl From<&WorkersConfig> for PoolConfig {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            worker_count: config.count,
            max_queue_size: config.queue_size,
        }
    }
}

/// Counters exposed for health checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Shared {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Queued plus running.
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WorkerPool {
    task_tx: mpsc::Sender<BackgroundTask>,
    shared: Arc<Shared>,
    worker_count: usize,
}

impl WorkerPool {
    /// Create the pool and spawn its workers. Must be called inside a
    /// tokio runtime.
    pub fn start(config: PoolConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let worker_count = config.worker_count.max(1);
        let (task_tx, task_rx) = mpsc::channel::<BackgroundTask>(config.max_queue_size.max(1));
        let task_rx = Arc::new(Mutex::new(task_rx));
        let shared = Arc::new(Shared::default());

        for i in 0..worker_count {
            let task_rx = Arc::clone(&task_rx);
            let handler = Arc::clone(&handler);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                worker_task(i, task_rx, handler, shared).await;
            });
        }

        info!(
            workers = worker_count,
            queue = config.max_queue_size,
            "worker pool started"
        );

        Self {
            task_tx,
            shared,
            worker_count,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            in_flight: self.shared.pending.load(Ordering::Acquire),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Wait until every accepted task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl TaskDispatcher for WorkerPool {
    fn dispatch(&self, task: BackgroundTask) {
        let name = task.name();
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.task_tx.try_send(task) {
            Ok(()) => debug!(task = name, "task queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.finish_one();
                warn!(task = name, "task queue full; dropping task");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.finish_one();
                error!(task = name, "worker pool closed; dropping task");
            }
        }
    }
}

/// Worker task that drains the shared queue
async fn worker_task(
    worker_id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<BackgroundTask>>>,
    handler: Arc<dyn TaskHandler>,
    shared: Arc<Shared>,
) {
    debug!(worker = worker_id, "worker starting");

    loop {
        let task = {
            let mut rx = task_rx.lock().await;
            match rx.recv().await {
                Some(t) => t,
                None => {
                    debug!(worker = worker_id, "worker shutting down (channel closed)");
                    return;
                }
            }
        };

        let name = task.name();
        match handler.handle(task).await {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = worker_id, task = name, "task completed");
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker = worker_id, task = name, error = %e, "task failed");
            }
        }
        shared.finish_one();
    }
}
