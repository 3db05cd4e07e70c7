//! Directed acyclic graph of steps.
//!
//! Vertices are keyed by the step's [`AtomId`](crate::core::AtomId). Edges
//! are registered symmetrically on both endpoints. Acyclicity is the
//! caller's responsibility; only self-edges are rejected.

mod dag;

pub use dag::{Dag, Node};
