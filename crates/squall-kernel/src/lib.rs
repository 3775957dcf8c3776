//! squall-kernel: the context-switching script-execution coordinator.
//!
//! Application code submits discrete jobs — metadata retrieval, event
//! modification, validation — to a small pool of expensive, stateful
//! script engines. Each job observes an execution environment
//! equivalent to a freshly-constructed engine without paying the cost
//! of actually rebuilding one per job.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ScriptPool                           │
//! │  ┌───────────────┐    ┌──────────────────────────────────┐  │
//! │  │   JobQueue    │    │  Worker thread (one per slot)    │  │
//! │  │  (FIFO, the   │───▶│  ┌────────────────────────────┐  │  │
//! │  │  only shared  │    │  │ ScriptEngine (exclusive)   │  │  │
//! │  │  structure)   │    │  │  baseline names + reset    │  │  │
//! │  └───────────────┘    │  └────────────────────────────┘  │  │
//! │         ▲             │  last successful context token   │  │
//! │  submit_sync /        └──────────────────────────────────┘  │
//! │  submit_async /                    │ EngineFactory           │
//! │  submit().await                    ▼ (rebuild on fatal)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The correctness story in one paragraph: an engine's global namespace
//! leaks between jobs unless cleaned, so every job runs after a
//! namespace reset — *unless* it declares itself contextually equal to
//! the previous job on the same engine, in which case the reset is
//! skipped as an optimization. The optimization can only ever skip
//! work, never change results: failed jobs taint the context, leaked
//! globals veto it, and resets sweep whatever a job (even a crashed
//! one) actually left behind.

pub mod engine;
pub mod jobs;
pub mod pool;
pub mod scheduler;

pub use engine::{
    EngineConfig, EngineFactory, EngineFatal, LuaEngineFactory, ScriptEngine, ScriptError,
};
pub use jobs::{MetadataJob, MetadataOutcome, ModifyJob, ValidateJob};
pub use pool::{PoolConfig, ScriptPool};
pub use scheduler::{ContextToken, JobListener, PoolError, PoolStats, ScriptJob};
