//! # Worker Pools
//!
//! Named groups of OS threads consuming a shared [`BlockingQueue`] of jobs.
//!
//! Every framework callback (accept, connect, receive, send completion, close) runs on
//! a worker pool, never on the I/O runtime. [`Workers`] bundles the two pools the
//! framework uses:
//!
//! - **work**: background jobs, several threads by default
//! - **dispatch**: completion callbacks, one thread by default so callbacks are
//!   observed in the order they were queued
//!
//! A pool with zero threads runs each job on its own detached thread.
//!
//! ## Failure Handling
//! A panicking job is caught and logged; the worker thread keeps serving the queue.
//! Once [`WorkerPool::stop`] has run the pool refuses new jobs and threads with
//! [`ProtocolError::JobCanceled`].

use crate::config::WorkerConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::blocking_queue::BlockingQueue;
use crate::utils::metrics::Metrics;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    name: String,
    queue: BlockingQueue<Job>,
    metrics: Arc<Metrics>,
    stopped: AtomicBool,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Worker loop: exits on cancellation, or after a job that stopped the pool.
    fn serve(&self, id: usize) {
        debug!(pool = %self.name, worker = id, "Worker started");
        while let Ok(job) = self.queue.dequeue() {
            self.run(job);
            if self.is_stopped() {
                break;
            }
        }
        debug!(pool = %self.name, worker = id, "Worker exited");
    }

    fn run(&self, job: Job) {
        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => self.metrics.job_executed(),
            Err(panic) => {
                self.metrics.job_panicked();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(pool = %self.name, panic = %message, "Job panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: JoinHandle<()>,
}

struct PoolInner {
    shared: Arc<Shared>,
    threads: Mutex<Vec<Worker>>,
}

impl PoolInner {
    fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.cancel();

        let workers = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread.thread().id() == current {
                continue;
            }
            if worker.thread.join().is_err() {
                error!(pool = %self.shared.name, worker = worker.id, "Worker thread panicked");
            }
        }
        self.shared.queue.clear();
        info!(pool = %self.shared.name, "Worker pool stopped");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A named, cloneable handle to a group of worker threads.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.shared.name)
            .field("threads", &self.thread_count())
            .field("queued", &self.queued_count())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool with no threads.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_metrics(name, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                shared: Arc::new(Shared {
                    name: name.into(),
                    queue: BlockingQueue::new(),
                    metrics,
                    stopped: AtomicBool::new(false),
                }),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a pool and start `count` threads.
    pub fn with_threads(name: impl Into<String>, count: usize) -> Result<Self> {
        let pool = Self::new(name);
        pool.increase(count)?;
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Start `count` more threads named `"{name} {index}"`.
    pub fn increase(&self, count: usize) -> Result<()> {
        let mut threads = self.inner.threads.lock();
        // checked under the lock: `stop` takes the thread list after setting the flag
        if self.is_stopped() {
            return Err(ProtocolError::JobCanceled);
        }
        for _ in 0..count {
            let id = threads.len();
            let shared = self.inner.shared.clone();
            let thread = thread::Builder::new()
                .name(format!("{} {}", shared.name, id))
                .spawn(move || shared.serve(id))?;
            threads.push(Worker { id, thread });
        }
        Ok(())
    }

    /// Queue a job. With zero threads the job runs on a detached thread.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            return Err(ProtocolError::JobCanceled);
        }
        if self.thread_count() == 0 {
            let shared = self.inner.shared.clone();
            thread::Builder::new()
                .name(format!("{} detached", shared.name))
                .spawn(move || shared.run(Box::new(job)))?;
            return Ok(());
        }
        self.inner.shared.queue.enqueue(Box::new(job));
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.inner.threads.lock().len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.shared.queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shared.is_stopped()
    }

    /// Cancel the queue, join every thread and drop pending jobs. Idempotent.
    ///
    /// When called from one of the pool's own threads that thread is not joined; it
    /// exits once the job that called `stop` returns.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

/// The work and dispatch pools used by the framework.
#[derive(Clone, Debug)]
pub struct Workers {
    work: WorkerPool,
    dispatch: WorkerPool,
}

impl Workers {
    pub fn new(config: &WorkerConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let work = WorkerPool::with_metrics("work", metrics.clone());
        work.increase(config.work_threads)?;
        let dispatch = WorkerPool::with_metrics("dispatch", metrics);
        dispatch.increase(config.dispatch_threads)?;
        Ok(Self { work, dispatch })
    }

    pub fn work_pool(&self) -> &WorkerPool {
        &self.work
    }

    pub fn dispatch_pool(&self) -> &WorkerPool {
        &self.dispatch
    }

    pub fn work<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.work.execute(job)
    }

    pub fn dispatch<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch.execute(job)
    }

    /// Run `work` on the work pool, then hand its output to `done` on the dispatch pool.
    pub fn work_then_dispatch<W, D, R>(&self, work: W, done: D) -> Result<()>
    where
        W: FnOnce() -> R + Send + 'static,
        D: FnOnce(R) + Send + 'static,
        R: Send + 'static,
    {
        let dispatch = self.dispatch.clone();
        self.work.execute(move || {
            let output = work();
            if let Err(e) = dispatch.execute(move || done(output)) {
                debug!(error = %e, "Dispatch pool rejected completion");
            }
        })
    }

    pub fn stop(&self) {
        self.work.stop();
        self.dispatch.stop();
    }
}
