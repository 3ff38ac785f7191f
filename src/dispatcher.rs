use crate::config::DispatcherConfig;
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared worker queue on which completion callbacks run.
///
/// Cloning is cheap; every clone feeds the same pool. The worker threads
/// exit once the last clone is dropped and the queue drains.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DispatcherStats>,
    name: String,
}

/// Counters for dispatcher throughput monitoring
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub jobs_posted: AtomicU64,
    pub jobs_executed: AtomicU64,
    pub jobs_panicked: AtomicU64,
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub jobs_posted: u64,
    pub jobs_executed: u64,
    pub jobs_panicked: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        // Finished counters first: a job is counted as posted before it can finish.
        let jobs_executed = self.jobs_executed.load(Ordering::Acquire);
        let jobs_panicked = self.jobs_panicked.load(Ordering::Acquire);
        DispatcherStatsSnapshot {
            jobs_posted: self.jobs_posted.load(Ordering::Acquire),
            jobs_executed,
            jobs_panicked,
        }
    }
}

impl Dispatcher {
    /// Spawn a worker pool sized by `config`.
    pub fn new(config: &DispatcherConfig) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let stats = Arc::new(DispatcherStats::default());
        let threads = config.worker_threads.max(1);

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || worker_loop(receiver, stats))?;
            workers.push(handle);
        }

        debug!(
            "Dispatcher '{}' started with {} worker threads",
            config.thread_name, threads
        );

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                sender,
                workers,
                stats,
                name: config.thread_name.clone(),
            }),
        })
    }

    /// Process-wide pool with default sizing, created on first use.
    ///
    /// # Panics
    ///
    /// Panics if the worker threads cannot be spawned.
    pub fn global() -> Dispatcher {
        static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                Dispatcher::new(&DispatcherConfig::default())
                    .unwrap_or_else(|e| panic!("failed to spawn global dispatcher: {e}"))
            })
            .clone()
    }

    /// Queue a job; it never runs on the calling thread.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.stats.jobs_posted.fetch_add(1, Ordering::Release);
        if self.inner.sender.send(Box::new(job)).is_err() {
            // Receivers live as long as the workers, which outlive every sender.
            error!("Dispatcher '{}' queue closed, dropping job", self.inner.name);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Jobs posted but not yet finished.
    pub fn pending(&self) -> u64 {
        let snapshot = self.stats();
        snapshot
            .jobs_posted
            .saturating_sub(snapshot.jobs_executed)
            .saturating_sub(snapshot.jobs_panicked)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(receiver: Receiver<Job>, stats: Arc<DispatcherStats>) {
    while let Ok(job) = receiver.recv() {
        trace!("Dispatcher worker picked up job");
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                stats.jobs_executed.fetch_add(1, Ordering::Release);
            }
            Err(payload) => {
                stats.jobs_panicked.fetch_add(1, Ordering::Release);
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Dispatched job panicked: {}", message);
            }
        }
    }
    trace!("Dispatcher worker exiting");
}
