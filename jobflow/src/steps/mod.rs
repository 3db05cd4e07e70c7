//! Step trait and implementations.
//!
//! Steps are the units of work scheduled by a chain. Each step is created
//! once from the originating request, may run several times under retries,
//! and can be asked to stop early.

mod builtin;
mod number_guess;
mod ping;

pub use builtin::{NoopStep, SleepStep};
pub use number_guess::NumberGuessStep;
pub use ping::PingStep;

use crate::context::{Request, StepContext};
use crate::core::{AtomId, StepReturn};
use crate::errors::StepError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Namespace used for the ids of steps shipped with this crate.
pub const BUILTIN_NAMESPACE: &str = "builtin";

/// Namespace used for the ids of the example steps.
pub const EXAMPLE_NAMESPACE: &str = "example";

/// Trait for schedulable steps.
///
/// The engine only ever calls these four operations. `run` may be called
/// more than once when the job is retried, and `stop` may be called while
/// `run` is in progress on another task.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the stable identity of this step.
    fn id(&self) -> &AtomId;

    /// One-time setup before the step is schedulable.
    ///
    /// Reads arguments from the request. An error here aborts chain
    /// construction before anything runs.
    async fn create(&self, ctx: &StepContext, req: &Request) -> Result<(), StepError>;

    /// Executes the unit of work once.
    ///
    /// Returning `Err` is recorded as a failed run.
    async fn run(&self, ctx: &StepContext) -> Result<StepReturn, StepError>;

    /// Requests early termination. Must return promptly.
    async fn stop(&self, ctx: &StepContext) -> Result<(), StepError>;
}
