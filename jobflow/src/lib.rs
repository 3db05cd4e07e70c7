//! # Jobflow
//!
//! A job-chain execution engine.
//!
//! A chain is a directed acyclic graph of steps run once per request:
//!
//! - **Dependency graph**: a job runs once every upstream job has completed
//! - **Per-job retries**: each job gets a retry budget and a wait between tries
//! - **Sequence retries**: a failed job can roll back and rerun the completed
//!   part of the sequence it belongs to
//! - **Cooperative shutdown**: stopping asks every running step to stop and
//!   waits for it, with bounded timeouts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jobflow::prelude::*;
//!
//! let fetch: Arc<dyn Step> = Arc::new(PingStep::new("ping", ""));
//! let guess: Arc<dyn Step> = Arc::new(NumberGuessStep::new("guess", ""));
//!
//! let chain = ChainBuilder::new("example", 1, request)
//!     .add_step(fetch.clone(), NodeOptions::new())
//!     .add_step(guess.clone(), NodeOptions::new().with_retry(7))
//!     .depends_on(guess.id(), fetch.id())
//!     .build()
//!     .await?;
//!
//! let outcome = Traverser::new(Arc::new(chain), TraverserConfig::default()).run().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod chain;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod graph;
pub mod observability;
pub mod runner;
pub mod steps;
pub mod testing;
pub mod traverser;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::chain::{Chain, ChainBuilder, Job, JobReport, NodeOptions};
    pub use crate::config::{LogConfig, TraverserConfig};
    pub use crate::context::{Request, StepContext, Tag};
    pub use crate::core::{AtomId, State, StepReturn};
    pub use crate::errors::{GraphError, JobflowError, StepError, StopError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::graph::{Dag, Node};
    pub use crate::observability::init_tracing;
    pub use crate::runner::{JobRunner, RunReturn, Runner, RunnerRepo};
    pub use crate::steps::{NoopStep, NumberGuessStep, PingStep, SleepStep, Step};
    pub use crate::traverser::{ChainOutcome, Reaper, Traverser};
    pub use std::sync::Arc;
}
