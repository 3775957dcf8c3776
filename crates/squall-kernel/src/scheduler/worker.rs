//! The worker — exclusive owner of one engine, consuming jobs in FIFO
//! order from the shared queue.
//!
//! Before each job the worker decides whether the engine needs a
//! namespace reset by comparing the job's context token against the
//! token of the previously *successful* job on this engine. A failed
//! job never records its token: its partial state may be inconsistent,
//! so the next job always resets.
//!
//! Recovery paths handled here, invisible to submitters:
//! - a failed reset discards the engine, rebuilds it via the factory,
//!   and retries the same job once against the fresh instance;
//! - a timed-out invocation delivers its failure and then discards the
//!   engine (unknown partial state, same response as a reset failure).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::engine::{EngineFactory, ScriptEngine};
use crate::scheduler::job::{ContextToken, PoolError, QueuedJob};
use crate::scheduler::queue::JobQueue;

/// Counters shared by every worker in a pool.
///
/// Tests use these to observe the reset-skip optimization; production
/// callers get a cheap health surface.
#[derive(Debug, Default)]
pub struct PoolStats {
    resets: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    engines_built: AtomicU64,
}

impl PoolStats {
    /// Number of namespace resets performed across the pool.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Jobs that ran to completion and delivered a result.
    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    /// Jobs that delivered a failure.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Engines built, including replacements after fatal errors.
    pub fn engines_built(&self) -> u64 {
        self.engines_built.load(Ordering::Relaxed)
    }

    fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_engine_built(&self) {
        self.engines_built.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawn one worker thread consuming from `queue` until it closes and
/// drains.
pub(crate) fn spawn_worker(
    index: usize,
    queue: Arc<JobQueue<Box<dyn QueuedJob>>>,
    factory: Arc<dyn EngineFactory>,
    stats: Arc<PoolStats>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("squall-worker-{index}"))
        .spawn(move || worker_loop(index, queue, factory, stats))
}

fn worker_loop(
    index: usize,
    queue: Arc<JobQueue<Box<dyn QueuedJob>>>,
    factory: Arc<dyn EngineFactory>,
    stats: Arc<PoolStats>,
) {
    let span = tracing::debug_span!("worker", index);
    let _guard = span.enter();

    // The engine lives and dies on this thread. `None` between a fatal
    // error and the next rebuild attempt.
    let mut engine: Option<ScriptEngine> = None;
    let mut last_context: Option<ContextToken> = None;

    while let Some(job) = queue.pop() {
        let eng = match engine.take() {
            Some(eng) => eng,
            None => match factory.build() {
                Ok(eng) => {
                    stats.record_engine_built();
                    last_context = None;
                    eng
                }
                Err(fatal) => {
                    warn!(error = %fatal, "could not build an engine; failing job");
                    stats.record_failure();
                    job.fail(PoolError::Engine(fatal));
                    continue;
                }
            },
        };

        engine = run_one(job, eng, &mut last_context, &*factory, &stats);
    }

    debug!("queue closed and drained; worker stopping");
}

/// Run a single job against the engine. Returns the engine to keep for
/// the next job, or `None` if it had to be discarded.
fn run_one(
    mut job: Box<dyn QueuedJob>,
    mut eng: ScriptEngine,
    last_context: &mut Option<ContextToken>,
    factory: &dyn EngineFactory,
    stats: &PoolStats,
) -> Option<ScriptEngine> {
    let kind = job.kind();

    let skip_reset = matches!(last_context.as_ref(), Some(prev) if job.is_contextually_equal(prev));
    if skip_reset {
        debug!(kind, "context unchanged; reset skipped");
    } else {
        *last_context = None;
        match eng.reset() {
            Ok(()) => stats.record_reset(),
            Err(fatal) => {
                // The engine is unusable. Replace it and retry this same
                // job once against the fresh instance; a fresh engine is
                // already at baseline, so no reset is needed.
                warn!(error = %fatal, kind, "reset failed; rebuilding engine");
                drop(eng);
                match factory.build() {
                    Ok(fresh) => {
                        stats.record_engine_built();
                        eng = fresh;
                    }
                    Err(fatal) => {
                        stats.record_failure();
                        job.fail(PoolError::Engine(fatal));
                        // No engine to hand back; build again next job.
                        return None;
                    }
                }
            }
        }
    }

    match job.run(&eng) {
        Ok(()) => {
            stats.record_success();
            *last_context = record_context(&eng, &*job);
            Some(eng)
        }
        Err(error) => {
            stats.record_failure();
            // Failure taints the context: never let a later "equal" job
            // skip the reset past possibly inconsistent state.
            *last_context = None;
            let discard = error.poisons_engine();
            if discard {
                warn!(kind, error = %error, "invocation poisoned the engine; discarding");
            }
            job.fail(PoolError::Script(error));
            if discard {
                None
            } else {
                Some(eng)
            }
        }
    }
}

/// Decide which token (if any) to record after a successful run.
///
/// Reusable tokens are only recorded when the job left no undeclared
/// residue: names beyond the baseline, beyond what its loaded script
/// files defined, and beyond its own declaration are leakage, and the
/// safe response is to force a reset before the next job.
fn record_context(eng: &ScriptEngine, job: &dyn QueuedJob) -> Option<ContextToken> {
    let token = job.context_token();
    if !token.is_reusable() {
        // A reset follows this kind regardless; nothing to audit.
        return Some(token);
    }

    let declared = job.declared_globals();
    let loaded = eng.loaded_names();
    let residue: Vec<String> = eng
        .enumerate_names()
        .difference(eng.baseline())
        .filter(|name| !loaded.contains(*name))
        .filter(|name| !declared.iter().any(|d| d == *name))
        .cloned()
        .collect();

    if residue.is_empty() {
        Some(token)
    } else {
        warn!(
            kind = token.kind(),
            ?residue,
            "job left undeclared globals; its context will not be reused"
        );
        None
    }
}
