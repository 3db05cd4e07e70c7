//! Live job chains.
//!
//! A [`Chain`] turns a static [`Dag`](crate::graph::Dag) into a schedulable
//! unit: it tracks every job's state and the try counters that gate
//! retries. [`ChainBuilder`] assembles one from steps and a request.

mod builder;
#[allow(clippy::module_inception)]
mod chain;
mod job;

pub use builder::{ChainBuilder, NodeOptions};
pub use chain::Chain;
pub use job::{Job, JobReport};
