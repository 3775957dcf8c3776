//! Scheduler — the job contract, the shared queue, and the workers.
//!
//! # Architecture
//!
//! ```text
//! submitters                    JobQueue                  workers
//! ┌──────────────┐   push   ┌──────────────┐   pop   ┌─────────────────┐
//! │ submit_sync  │─────────▶│ FIFO, closed │────────▶│ worker thread 0 │
//! │ submit_async │          │ on shutdown  │         │  owns engine 0  │
//! │ submit().await│         └──────────────┘    ...  │  last context   │
//! └──────────────┘                                   └─────────────────┘
//! ```
//!
//! Each worker exclusively owns one engine and compares every dequeued
//! job's context token against its own previous job to decide whether
//! the namespace reset can be skipped. Cross-worker state is never
//! shared, so the optimization is deliberately scoped per worker.

mod job;
mod queue;
mod worker;

pub use job::{ContextToken, JobListener, PoolError, ScriptJob};
pub use queue::JobQueue;
pub use worker::PoolStats;

pub(crate) use job::{Delivery, Envelope, QueuedJob};
pub(crate) use worker::spawn_worker;
