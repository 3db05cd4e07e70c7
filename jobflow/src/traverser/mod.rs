//! Chain execution: dispatch, reaping and shutdown.
//!
//! A [`Traverser`] seeds every runnable job, runs each dispatched job in its
//! own task under a [`crate::runner::JobRunner`], and hands finished jobs to
//! the [`Reaper`], which decides what runs next. Two bounded channels carry
//! the hand-offs: dispatch (jobs to run) and completion (jobs that finished).

mod reaper;
#[allow(clippy::module_inception)]
mod traverser;

#[cfg(test)]
mod integration_tests;

pub use reaper::Reaper;
pub use traverser::{ChainOutcome, Traverser};
