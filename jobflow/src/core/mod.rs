//! Core domain model types for jobflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Step identity (`AtomId`)
//! - Job lifecycle states and their classes
//! - The value a step returns from one run

mod atom;
mod state;

pub use atom::{AtomId, StepReturn};
pub use state::State;
