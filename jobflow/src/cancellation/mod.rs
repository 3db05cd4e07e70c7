//! Cooperative cancellation.
//!
//! The engine never forcibly terminates work. Stop switches and completion
//! latches are `CancellationToken`s that tasks poll or await.

mod token;

pub use token::CancellationToken;
