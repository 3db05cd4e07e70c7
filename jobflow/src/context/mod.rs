//! Context handed to steps.
//!
//! This module provides:
//! - The originating request with its arguments and tags
//! - The per-call step context with retry bookkeeping

mod execution;
mod request;

pub use execution::StepContext;
pub use request::{Request, Tag};
