//! Shared thread pool for IO work (image decode, audio reads, file writes)
//!
//! Uses work-stealing deques:
//! - New tasks go to the global injector, which idle workers poll first
//! - Workers steal from each other when idle
//!
//! Epoch mechanism: a submitter passes its epoch counter with the job.
//! If the counter moved before a worker picks the job up, the job is
//! dropped unexecuted. Anything it captured (e.g. an `IoPromise`) is
//! dropped with it, which resolves the matching future as canceled.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work-stealing pool shared by every reader of a registry.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    skipped: Arc<AtomicUsize>,
}

impl Workers {
    /// Create worker pool.
    ///
    /// Recommended: `num_cpus::get() * 3 / 4` (leave room for the cache
    /// thread, the audio device and the consumer thread).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::new();
        let mut stealers: Vec<Stealer<Job>> = Vec::new();
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
                .name(format!("tlplay-io-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        // 1. Own queue
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }

                        // 2. Global injector, batch into own queue
                        if let Some(job) = injector.steal_batch_and_pop(&worker).success() {
                            job();
                            continue;
                        }

                        // 3. Other workers
                        if let Some(job) = stealers.iter().find_map(|s| s.steal().success()) {
                            job();
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work: short sleep to avoid CPU spin
                        thread::sleep(Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                })
                .expect("Failed to spawn worker thread");

            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Self {
            injector,
            handles,
            shutdown,
            skipped: Arc::new(AtomicUsize::new(0)),
        }
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

    /// Execute closure only if `epoch` still equals `expected` when a worker
    /// picks it up. Otherwise the closure is dropped without running.
    pub fn execute_with_epoch<F>(&self, epoch: Arc<AtomicU64>, expected: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let skipped = Arc::clone(&self.skipped);
        let wrapped = move || {
            if epoch.load(Ordering::Acquire) == expected {
                f();
            } else {
                skipped.fetch_add(1, Ordering::Relaxed);
            }
        };
        self.injector.push(Box::new(wrapped));
    }

    /// Number of jobs dropped because their epoch went stale.
    pub fn skipped_jobs(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        use std::time::Instant;

        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Canceled readers leave only epoch-skipped jobs behind, so threads
        // should finish quickly. The deadline keeps a hung decode from
        // blocking teardown.
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

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("skipped", &self.skipped_jobs())
            .finish()
    }
}
