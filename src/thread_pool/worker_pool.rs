use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, error, info, warn};

use super::{PoolConfig, ThreadPool};
use crate::{PoolError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identity reserved for threads that are not pool workers.
const NO_POOL: usize = 0;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Identity of the pool whose worker runs on this thread.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(NO_POOL) };
}

/// Lifecycle stage of a [`WorkerPool`]. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and executing jobs.
    Running,
    /// Shutdown has begun: no new job starts executing.
    Stopping,
    /// Every worker has been joined; the pool is inert.
    Stopped,
}

/// A fixed-size pool of long-lived worker threads fed by a shared FIFO queue.
///
/// Jobs are delivered over an unbounded MPMC channel, so each submission
/// wakes a single idle worker. Completion is tracked by a `pending` counter
/// guarded by its own lock, which lets any number of threads block in
/// [`wait_all`](WorkerPool::wait_all) until the pool drains.
///
/// A panicking job is caught at the worker boundary, logged and counted; the
/// worker keeps serving the queue, so the pool never loses capacity.
///
/// Dropping the pool drains every submitted job and joins all workers.
pub struct WorkerPool {
    jobs: Sender<Job>,
    /// Kept so leftover jobs can be discarded once the workers are gone.
    queue: Receiver<Job>,
    lifecycle: Mutex<Lifecycle>,
    shared: Arc<Shared>,
    threads: usize,
}

struct Lifecycle {
    /// Dropping this sender disconnects the stop channel and wakes every worker.
    stop: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns a pool according to `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSize`] for a zero thread count, or
    /// [`PoolError::Spawn`] if a worker thread cannot be created. Workers
    /// started before the failure are stopped and joined.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let threads = config.thread_count();
        if threads == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (jobs, queue) = channel::unbounded::<Job>();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let mut pool = WorkerPool {
            jobs,
            queue,
            lifecycle: Mutex::new(Lifecycle {
                stop: Some(stop_tx),
                workers: Vec::with_capacity(threads),
            }),
            shared: Arc::new(Shared::new()),
            threads,
        };

        for id in 0..threads {
            let worker = Worker {
                id,
                jobs: pool.queue.clone(),
                stop: stop_rx.clone(),
                shared: Arc::clone(&pool.shared),
            };
            // On error the partially built pool is dropped, which joins the
            // workers spawned so far.
            let handle = config.thread_builder(id).spawn(move || worker.run())?;
            pool.lifecycle
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .workers
                .push(handle);
        }

        info!("Worker pool started with {} threads", threads);
        Ok(pool)
    }

    /// Queues `job` for execution on one of the workers.
    ///
    /// Safe to call from any thread, including from inside a job running on
    /// this pool. Once shutdown has begun the job is dropped without running
    /// and counted in [`discarded_jobs`](WorkerPool::discarded_jobs).
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.shared.lock_pending();
        if self.shared.stopping.load(Ordering::Acquire) {
            drop(pending);
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            warn!("Job submitted after shutdown began, dropping it");
            drop_discarded(job);
            return;
        }
        // The pool holds a receiver, so the channel cannot be disconnected.
        if self.jobs.send(Box::new(job)).is_ok() {
            *pending += 1;
        }
    }

    /// Number of jobs waiting in the queue, excluding those being executed.
    ///
    /// This is a snapshot and may be stale as soon as it is returned.
    pub fn pending_count(&self) -> usize {
        self.jobs.len()
    }

    /// Number of jobs currently executing. Best effort, like
    /// [`pending_count`](WorkerPool::pending_count).
    pub fn active_count(&self) -> usize {
        let pending = *self.shared.lock_pending();
        pending.saturating_sub(self.jobs.len())
    }

    /// Blocks until every submitted job has completed or been discarded.
    ///
    /// Any number of threads may wait concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReentrantCall`] when called from a job running on
    /// this pool, since that worker could never become idle.
    pub fn wait_all(&self) -> Result<()> {
        if self.shared.on_worker_thread() {
            return Err(PoolError::ReentrantCall);
        }
        let pending = self.shared.lock_pending();
        drop(self.shared.wait_drained(pending));
        Ok(())
    }

    /// Stops the pool and joins every worker.
    ///
    /// With `wait_for_all`, every job submitted so far runs first. Without
    /// it, jobs still queued once shutdown begins are discarded unexecuted;
    /// jobs already executing are allowed to finish. Calling this again after
    /// it has completed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReentrantCall`] when called from a job running on
    /// this pool, and [`PoolError::WorkerPanicked`] if a worker thread could
    /// not be joined cleanly.
    pub fn shutdown(&self, wait_for_all: bool) -> Result<()> {
        if self.shared.on_worker_thread() {
            return Err(PoolError::ReentrantCall);
        }

        let mut lifecycle = lock(&self.lifecycle);
        if self.shared.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        {
            let pending = self.shared.lock_pending();
            let _pending = if wait_for_all {
                debug!("Draining {} jobs before shutdown", *pending);
                self.shared.wait_drained(pending)
            } else {
                pending
            };
            self.shared.stopping.store(true, Ordering::Release);
        }
        debug!("Worker pool stopping");

        drop(lifecycle.stop.take());
        let mut lost = 0;
        for handle in lifecycle.workers.drain(..) {
            if handle.join().is_err() {
                lost += 1;
            }
        }

        let mut leftovers = 0;
        for job in self.queue.try_iter() {
            self.shared.discard_queued(1);
            drop_discarded(job);
            leftovers += 1;
        }
        if leftovers > 0 {
            debug!("Discarded {} queued jobs", leftovers);
        }

        self.shared.stopped.store(true, Ordering::Release);
        info!(
            "Worker pool stopped ({} jobs discarded, {} jobs panicked)",
            self.discarded_jobs(),
            self.panicked_jobs()
        );

        if lost > 0 {
            return Err(PoolError::WorkerPanicked(format!(
                "{lost} of {} workers",
                self.threads
            )));
        }
        Ok(())
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> PoolState {
        if self.shared.stopped.load(Ordering::Acquire) {
            PoolState::Stopped
        } else if self.shared.stopping.load(Ordering::Acquire) {
            PoolState::Stopping
        } else {
            PoolState::Running
        }
    }

    /// Number of worker threads the pool was built with.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Total number of jobs that panicked while executing.
    pub fn panicked_jobs(&self) -> usize {
        self.shared.panicked.load(Ordering::Relaxed)
    }

    /// Total number of jobs dropped without running, either queued when a
    /// non-draining shutdown began or submitted after shutdown.
    pub fn discarded_jobs(&self) -> usize {
        self.shared.discarded.load(Ordering::Relaxed)
    }
}

impl ThreadPool for WorkerPool {
    fn new(threads: u32) -> Result<Self> {
        WorkerPool::with_config(PoolConfig::default().threads(threads as usize))
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        WorkerPool::spawn(self, job)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.shared.on_worker_thread() {
            // A worker cannot join itself; let the workers exit on their own.
            warn!("Worker pool dropped from one of its own jobs, workers are detached");
            self.shared.stopping.store(true, Ordering::Release);
            drop(lock(&self.lifecycle).stop.take());
            return;
        }
        if let Err(e) = self.shutdown(true) {
            error!("Worker pool shutdown failed: {}", e);
        }
    }
}

/// State shared between the pool handle and its workers.
struct Shared {
    id: usize,
    /// Jobs submitted but not yet completed, including running ones.
    pending: Mutex<usize>,
    drained: Condvar,
    stopping: AtomicBool,
    stopped: AtomicBool,
    panicked: AtomicUsize,
    discarded: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            pending: Mutex::new(0),
            drained: Condvar::new(),
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            panicked: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, usize> {
        lock(&self.pending)
    }

    fn wait_drained<'a>(&self, pending: MutexGuard<'a, usize>) -> MutexGuard<'a, usize> {
        self.drained
            .wait_while(pending, |pending| *pending != 0)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Retires `jobs` from `pending`, releasing waiters once it hits zero.
    fn complete(&self, jobs: usize) {
        let mut pending = self.lock_pending();
        debug_assert!(*pending >= jobs, "completed more jobs than were pending");
        *pending -= jobs;
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Retires queued jobs that were dropped instead of run.
    fn discard_queued(&self, jobs: usize) {
        self.discarded.fetch_add(jobs, Ordering::Relaxed);
        self.complete(jobs);
    }

    fn on_worker_thread(&self) -> bool {
        CURRENT_POOL.with(Cell::get) == self.id
    }
}

struct Worker {
    id: usize,
    jobs: Receiver<Job>,
    stop: Receiver<()>,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self) {
        CURRENT_POOL.with(|pool| pool.set(self.shared.id));
        debug!("Worker {} started", self.id);

        loop {
            // Nothing is ever sent on `stop`; it only fires once disconnected.
            let job = select! {
                recv(self.jobs) -> job => job.ok(),
                recv(self.stop) -> _ => None,
            };
            let Some(job) = job else { break };

            if self.shared.stopping.load(Ordering::Acquire) {
                self.shared.discard_queued(1);
                drop_discarded(job);
                debug!("Worker {} discarded a job during shutdown", self.id);
                break;
            }

            debug!("Worker {} executing job", self.id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            if outcome.is_err() {
                self.shared.panicked.fetch_add(1, Ordering::Relaxed);
            }
            self.shared.complete(1);
            if outcome.is_err() {
                error!("Worker {} job panicked, continuing", self.id);
            }
        }

        CURRENT_POOL.with(|pool| pool.set(NO_POOL));
        debug!("Worker {} shutting down", self.id);
    }
}

/// Drops a job that will never run. A panic raised by its captured state is
/// contained so the caller's bookkeeping stays intact.
fn drop_discarded<T>(job: T) {
    if panic::catch_unwind(AssertUnwindSafe(move || drop(job))).is_err() {
        error!("Discarded job panicked while being dropped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn discard_rebalances_pending() {
        let shared = Shared::new();
        *shared.lock_pending() = 3;

        shared.discard_queued(2);
        shared.complete(1);

        assert_eq!(*shared.lock_pending(), 0);
        assert_eq!(shared.discarded.load(Ordering::Relaxed), 2);
        drop(shared.wait_drained(shared.lock_pending()));
    }

    #[test]
    fn completion_releases_waiter() {
        let shared = Arc::new(Shared::new());
        *shared.lock_pending() = 1;

        let finisher = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shared.complete(1);
            })
        };

        let pending = shared.wait_drained(shared.lock_pending());
        assert_eq!(*pending, 0);
        drop(pending);
        finisher.join().unwrap();
    }

    #[test]
    fn workers_are_tagged_with_their_pool() {
        let pool = WorkerPool::with_config(PoolConfig::default().threads(1)).unwrap();
        let other = WorkerPool::with_config(PoolConfig::default().threads(1)).unwrap();
        let (tx, rx) = channel::bounded(1);

        pool.spawn(move || tx.send(CURRENT_POOL.with(Cell::get)).unwrap());

        assert_eq!(rx.recv().unwrap(), pool.shared.id);
        assert_ne!(pool.shared.id, other.shared.id);
        assert!(!pool.shared.on_worker_thread());
    }

    #[test]
    fn state_follows_shutdown() {
        let pool = WorkerPool::with_config(PoolConfig::default().threads(2)).unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        pool.shutdown(false).unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);
        assert!(lock(&pool.lifecycle).workers.is_empty());
    }

    #[test]
    fn dropping_last_handle_inside_a_job_detaches_workers() {
        let pool = Arc::new(WorkerPool::with_config(PoolConfig::default().threads(2)).unwrap());
        let shared = Arc::clone(&pool.shared);
        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        let (done_tx, done_rx) = channel::bounded(1);

        let inner = Arc::clone(&pool);
        pool.spawn(move || {
            let _ = gate_rx.recv();
            drop(inner);
            done_tx.send(()).unwrap();
        });
        drop(pool);
        drop(gate_tx);

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(shared.stopping.load(Ordering::Acquire));

        // Each worker holds a reference until its loop exits.
        let deadline = Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&shared) > 1 {
            assert!(Instant::now() < deadline, "workers did not exit");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*shared.lock_pending(), 0);
    }
}
