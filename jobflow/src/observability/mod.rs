//! Tracing subscriber setup.
//!
//! The engine only emits through `tracing` macros. Binaries and tests that
//! want the output call [`init_tracing`] once at startup.

mod subscriber;

pub use subscriber::{env_filter, init_tracing};
