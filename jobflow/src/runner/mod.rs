//! Per-job retry-loop executors.
//!
//! A [`JobRunner`] is created when a job is dispatched and dropped once the
//! job has been reaped. While it runs it lives in a [`RunnerRepo`] so the
//! stop path can find it.

mod job_runner;
mod repo;

pub use job_runner::{JobRunner, RunReturn};
pub use repo::RunnerRepo;

use crate::errors::StepError;
use async_trait::async_trait;

/// Runs one job, retrying it within its budget, and stops it on request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs the job until it succeeds, is stopped, or runs out of tries.
    ///
    /// Never fails: faults in the step surface in the returned state.
    async fn run(&self) -> RunReturn;

    /// Stops the job. Blocks until the step's own stop returns.
    ///
    /// Calling it again is a no-op.
    async fn stop(&self) -> Result<(), StepError>;
}
