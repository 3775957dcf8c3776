//! The pool — the coordinator callers submit jobs to.
//!
//! `ScriptPool` owns the shared job queue and a set of worker threads,
//! each exclusively owning one engine. Submission comes in three
//! flavors over the same delivery plumbing:
//!
//! - [`ScriptPool::submit_sync`] blocks the calling thread until the
//!   job completes (do not call it from inside an async runtime —
//!   use [`ScriptPool::submit`] there);
//! - [`ScriptPool::submit`] is the awaitable equivalent;
//! - [`ScriptPool::submit_async`] returns immediately and invokes a
//!   listener from the worker's thread when the job finishes.
//!
//! Shutdown policy: `shutdown()` stops intake, lets already-queued jobs
//! drain to completion, then joins every worker thread. It is
//! idempotent, and `Drop` runs it as a safety net. Submissions after
//! shutdown fail with [`PoolError::QueueClosed`].

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::engine::{EngineConfig, EngineFactory, LuaEngineFactory};
use crate::scheduler::{
    spawn_worker, Delivery, Envelope, JobListener, JobQueue, PoolError, PoolStats, QueuedJob,
    ScriptJob,
};

/// Configuration for pool start-up.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads, each with its own engine. The system
    /// runs with 1; the design generalizes.
    pub workers: usize,
    /// Engine construction settings handed to the factory.
    pub engine: EngineConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            engine: EngineConfig::default(),
        }
    }
}

impl PoolConfig {
    /// A pool of the given size with default engine settings.
    pub fn sized(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }

    /// Override the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// The coordinator: a pool of engine-owning workers behind a FIFO queue.
pub struct ScriptPool {
    queue: Arc<JobQueue<Box<dyn QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PoolStats>,
}

impl ScriptPool {
    /// Start a pool with the default Lua engine factory.
    pub fn start(config: PoolConfig) -> std::io::Result<Self> {
        let factory = Arc::new(LuaEngineFactory::new(config.engine.clone()));
        Self::start_with_factory(config, factory)
    }

    /// Start a pool with a custom engine factory (tests, alternative
    /// runtimes).
    pub fn start_with_factory(
        config: PoolConfig,
        factory: Arc<dyn EngineFactory>,
    ) -> std::io::Result<Self> {
        let queue = Arc::new(JobQueue::new());
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            workers.push(spawn_worker(
                index,
                queue.clone(),
                factory.clone(),
                stats.clone(),
            )?);
        }
        debug!(workers = workers.len(), "script pool started");

        Ok(Self {
            queue,
            workers: Mutex::new(workers),
            stats,
        })
    }

    /// Submit a job and block the calling thread until it completes.
    ///
    /// This is the only blocking call the pool exposes. From async
    /// code use [`ScriptPool::submit`] instead.
    pub fn submit_sync<J: ScriptJob>(&self, job: J) -> Result<J::Output, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(job, Delivery::Channel(tx))?;
        match rx.blocking_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::WorkerGone),
        }
    }

    /// Submit a job and await its completion.
    pub async fn submit<J: ScriptJob>(&self, job: J) -> Result<J::Output, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(job, Delivery::Channel(tx))?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::WorkerGone),
        }
    }

    /// Submit a job and return immediately; the listener is invoked
    /// from the worker's thread once the job finishes.
    pub fn submit_async<J, L>(&self, job: J, listener: L) -> Result<(), PoolError>
    where
        J: ScriptJob,
        L: JobListener<J::Output>,
    {
        self.enqueue(job, Delivery::Listener(Box::new(listener)))
    }

    fn enqueue<J: ScriptJob>(&self, job: J, delivery: Delivery<J::Output>) -> Result<(), PoolError> {
        let envelope: Box<dyn QueuedJob> = Box::new(Envelope::new(job, delivery));
        self.queue.push(envelope).map_err(|_| PoolError::QueueClosed)
    }

    /// Pool-wide counters (resets, successes, failures, engine builds).
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Stop accepting submissions, drain already-queued jobs, and join
    /// every worker thread. Idempotent; the pool is not reusable
    /// afterwards.
    pub fn shutdown(&self) {
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            // A panicked worker already failed its job; nothing to do.
            let _ = worker.join();
        }
        debug!("script pool shut down");
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
