//! omni-scheduler - Bounded-concurrency job scheduling for Omni DevEnv
//!
//! Runs many independent async jobs under a global concurrency ceiling and
//! surfaces each job's outcome as soon as it is ready. Every batch operation
//! of the dev tooling (hashing corpus files, running fuzz regressions,
//! querying git in bounded batches, compiler and formatter invocations) goes
//! through this one implementation.
//!
//! # Architecture (ODF-REP Compliant)
//!
//! ```text
//! omni-scheduler/src/
//! ├── lib.rs        # Re-exports (this file)
//! ├── error.rs      # SchedulerError enum
//! ├── config.rs     # SchedulerConfig, env overrides, default limit
//! ├── outcome.rs    # Outcome<T, E>
//! ├── queue.rs      # Bounded admission queue (backpressure)
//! ├── worker.rs     # Feeder + worker loop, result sink
//! ├── lifecycle.rs  # TaskScope: cancel / abort / join on every exit path
//! ├── aggregate.rs  # Multi-failure reporting policy
//! ├── surface.rs    # Scheduler, run_all, run_all_outcomes, run_streaming
//! ├── process.rs    # External process jobs
//! ├── hash.rs       # SHA-256 file hashing jobs
//! └── batch.rs      # Argument chunking
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use omni_scheduler::{run_all, run_streaming, CommandSpec};
//!
//! // Batch: wait for everything, fail with the last error observed.
//! let lengths = run_all(paths.into_iter().map(|p| async move { measure(p).await }), 8).await?;
//!
//! // Streaming: handle each output as it completes.
//! let mut outputs = run_streaming(specs.into_iter().map(CommandSpec::into_job), 4)?;
//! while let Some(output) = outputs.next().await {
//!     handle(output?);
//! }
//! ```

// ============================================================================
// Module Declarations (ODF-REP: Atomic Structure)
// ============================================================================

mod aggregate;
mod batch;
mod config;
mod error;
mod hash;
mod lifecycle;
mod outcome;
mod process;
mod queue;
mod surface;
mod worker;

// ============================================================================
// Public Re-exports
// ============================================================================

pub use aggregate::aggregate;
pub use batch::{Chunks, chunks};
pub use config::{
    CANCEL_ON_FIRST_FAILURE_ENV, LIMIT_ENV, MAX_WORKERS, SchedulerConfig, default_limit,
};
pub use error::SchedulerError;
pub use hash::{FileDigest, HashError, hash_file, hash_files};
pub use lifecycle::{TaskPanic, TaskScope};
pub use outcome::Outcome;
pub use process::{CommandSpec, ProcessError, check_command, run_command};
pub use surface::{Completions, Scheduler, run_all, run_all_outcomes, run_streaming};

// Re-export the cancellation token so callers do not need a direct dependency.
pub use tokio_util::sync::CancellationToken;
