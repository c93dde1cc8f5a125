//! Shared thread pool for reader decode jobs.
//!
//! Uses work-stealing deques:
//! - New jobs go to the global injector (checked before stealing)
//! - Idle workers steal older jobs from each other
//!
//! Epoch mechanism: each reader owns an [`Epoch`]. A job enqueued under one
//! epoch is skipped at execution time once the reader cancels (bumps the
//! epoch). Skipped jobs drop their promise, which the Timeline reads as an
//! abandoned layer.

use crossbeam::deque::{Injector, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation counter shared between a reader and its queued jobs.
#[derive(Debug, Clone, Default)]
pub struct Epoch(Arc<AtomicU64>);

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Invalidate every job enqueued so far. Returns the new epoch.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Worker pool with work-stealing for decode jobs.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// let epoch = Epoch::new();
/// workers.execute_with_epoch(&epoch, move || promise.set(decode()));
/// epoch.bump(); // jobs not started yet are skipped
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .finish()
    }
}

impl Workers {
    /// Create worker pool with `num_threads` threads.
    ///
    /// Recommended: `num_cpus::get() * 3 / 4` (leave room for the owner,
    /// timeline and player threads).
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::new();
        let mut stealers = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            workers_local.push(worker);
        }

        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("tlplay-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }

                        if let Some(job) = injector.steal_batch_and_pop(&worker).success() {
                            job();
                            continue;
                        }

                        let stolen = stealers
                            .iter()
                            .find_map(|stealer| stealer.steal().success());
                        if let Some(job) = stolen {
                            job();
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work - short sleep to avoid CPU spin
                        thread::sleep(Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                })?;

            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Ok(Self {
            injector,
            handles,
            shutdown,
        })
    }

    /// Pool sized from the CPU count.
    pub fn with_default_threads() -> std::io::Result<Self> {
        Self::new((num_cpus::get() * 3 / 4).max(1))
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Execute closure on a worker thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    /// Execute closure unless `epoch` moved on before a worker picked it up.
    ///
    /// The check happens at execution time, not enqueue time.
    pub fn execute_with_epoch<F>(&self, epoch: &Epoch, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let expected = epoch.current();
        let epoch = epoch.clone();
        self.injector.push(Box::new(move || {
            if epoch.current() == expected {
                f();
            }
        }));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Queued jobs are drained before exit; the deadline only guards
        // against a stuck decode.
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}
