//! Background saga worker: claims queued sagas and drives them to a
//! terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use runplane_saga::{SagaCoordinator, SagaStatus};

use crate::queue::WorkQueue;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    /// Number of worker threads. Sagas run concurrently across threads;
    /// steps within one saga stay sequential because a claimed saga is
    /// driven by exactly one worker.
    pub workers: usize,
    /// Name prefix for worker threads and logs.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
            workers: 2,
            name: "saga-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub sagas_processed: u64,
    pub sagas_succeeded: u64,
    pub sagas_failed: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running worker pool.
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started_at: Instant,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the workers to drain.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for join in self.joins {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started_at.elapsed().as_secs();
        stats
    }
}

/// Background driver for accepted sagas.
///
/// Each thread loops: claim a work item, run the saga to completion, record
/// the outcome; sleep for the poll interval when the queue is empty.
pub struct SagaWorker {
    queue: Arc<dyn WorkQueue>,
    coordinator: Arc<SagaCoordinator>,
}

impl SagaWorker {
    pub fn new(queue: Arc<dyn WorkQueue>, coordinator: Arc<SagaCoordinator>) -> Self {
        Self { queue, coordinator }
    }

    /// Spawn the worker pool.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let queue = self.queue;
        let coordinator = self.coordinator;

        let mut joins = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let name = format!("{}-{index}", config.name);
            let shutdown = shutdown.clone();
            let stats = stats.clone();
            let queue = queue.clone();
            let coordinator = coordinator.clone();
            let poll_interval = config.poll_interval;

            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    worker_loop(&name, queue, coordinator, shutdown, stats, poll_interval);
                })
                .expect("failed to spawn saga worker thread");
            joins.push(join);
        }

        info!(name = %config.name, workers = config.workers.max(1), "saga workers started");
        WorkerHandle {
            shutdown,
            joins,
            stats,
            started_at: Instant::now(),
        }
    }
}

fn worker_loop(
    name: &str,
    queue: Arc<dyn WorkQueue>,
    coordinator: Arc<SagaCoordinator>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<WorkerStats>>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(item) = queue.claim() else {
            thread::sleep(poll_interval);
            continue;
        };

        debug!(
            worker = %name,
            saga_id = %item.saga_id,
            tenant_id = %item.tenant_id,
            "claimed saga"
        );

        let outcome = coordinator.run_to_completion(&item.saga_id);

        if let Ok(mut s) = stats.lock() {
            s.sagas_processed += 1;
            match &outcome {
                Ok(SagaStatus::Completed) => s.sagas_succeeded += 1,
                Ok(_) | Err(_) => s.sagas_failed += 1,
            }
        }

        if let Err(e) = outcome {
            warn!(
                worker = %name,
                saga_id = %item.saga_id,
                error = %e,
                "saga run aborted"
            );
            // Make sure the execution record does not stay RUNNING forever.
            coordinator.abandon(&item.saga_id, &e.to_string());
        }
    }
    debug!(worker = %name, "saga worker stopped");
}
