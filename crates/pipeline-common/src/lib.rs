//! # Pipeline Common
//!
//! Shared building blocks for the batch media pipelines.
//!
//! ## Features
//!
//! - [`WorkerPool`]: a fixed-size pool that runs independent work items through
//!   a transform and yields completions in arrival order, with cooperative
//!   cancellation
//! - [`EmitThrottle`]: rate limiting for progress emissions
//! - [`PipelineError`]: failures that belong to the pool itself rather than to
//!   the work it runs
//!
//! ## License
//!
//! MIT License
//!

use thiserror::Error;

mod throttle;
mod worker_pool;

#[cfg(test)]
mod test_utils;

pub use throttle::EmitThrottle;
pub use tokio_util::sync::CancellationToken;
pub use worker_pool::{
    Completion, MAX_DEFAULT_WORKERS, PoolRun, WorkerPool, default_concurrency,
};

/// Errors produced by the pool machinery for a single work item.
///
/// Item transforms report their own failures through their own error type,
/// which must be constructible from this one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("worker task was cancelled by the runtime")]
    WorkerCancelled,
}
