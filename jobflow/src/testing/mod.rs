//! Testing utilities for job chains.
//!
//! This module provides a scriptable mock step and helpers to build
//! small chains from it.

mod mocks;

pub use mocks::{linear_chain, MockStep};
