//! Error types for the jobflow engine.
//!
//! Graph construction reports named errors. Step failures during a run are
//! not errors at this level: they surface as job states. Only the stop
//! sequence returns an error to its caller once execution has begun.

use crate::core::AtomId;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for jobflow operations.
#[derive(Debug, Error)]
pub enum JobflowError {
    /// The graph rejected a node or an edge.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A step failed to set itself up or to stop.
    #[error("{0}")]
    Step(#[from] StepError),

    /// Stopping the traverser did not complete cleanly.
    #[error("{0}")]
    Stop(#[from] StopError),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobflowError {
    /// Returns a short machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graph(e) => e.code(),
            Self::Step(_) => "STEP",
            Self::Stop(_) => "STOP",
            Self::Config(_) => "CONFIG",
        }
    }
}

/// Errors raised while registering nodes and edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node with the same id is already in the graph.
    #[error("already registered node: {0}")]
    AlreadyRegisteredNode(AtomId),

    /// The edge already exists on the downstream node.
    #[error("already registered upstream: {upstream} -> {node}")]
    AlreadyRegisteredUpstream {
        /// The downstream node.
        node: AtomId,
        /// The upstream node.
        upstream: AtomId,
    },

    /// The edge already exists on the upstream node.
    #[error("already registered downstream: {upstream} -> {node}")]
    AlreadyRegisteredDownstream {
        /// The downstream node.
        node: AtomId,
        /// The upstream node.
        upstream: AtomId,
    },

    /// No node with this id is in the graph.
    #[error("not registered node: {0}")]
    NotRegisteredNode(AtomId),

    /// A node cannot be its own upstream.
    #[error("node cannot depend on itself: {0}")]
    SelfLoop(AtomId),

    /// A node was placed in more than one retry sequence.
    #[error("node already belongs to a sequence: {0}")]
    AlreadyInSequence(AtomId),
}

impl GraphError {
    /// Returns a short machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegisteredNode(_) => "GRAPH-ALREADY-REGISTERED-NODE",
            Self::AlreadyRegisteredUpstream { .. } => "GRAPH-ALREADY-REGISTERED-UPSTREAM",
            Self::AlreadyRegisteredDownstream { .. } => "GRAPH-ALREADY-REGISTERED-DOWNSTREAM",
            Self::NotRegisteredNode(_) => "GRAPH-NOT-REGISTERED-NODE",
            Self::SelfLoop(_) => "GRAPH-SELF-LOOP",
            Self::AlreadyInSequence(_) => "GRAPH-ALREADY-IN-SEQUENCE",
        }
    }
}

/// Errors reported by step implementations.
#[derive(Debug, Error)]
pub enum StepError {
    /// A request argument is absent.
    #[error("missing argument: {0}")]
    MissingArgument(String),

    /// A request argument has the wrong type or an out-of-range value.
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument {
        /// The argument name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The step failed while running.
    #[error("step execution failed: {0}")]
    Execution(String),

    /// The step failed to stop.
    #[error("step stop failed: {0}")]
    Stop(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepError {
    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by the stop sequence.
///
/// The stop sequence always runs to completion before one of these is returned.
#[derive(Debug, Clone, Error)]
pub enum StopError {
    /// One or more runners failed to stop.
    #[error("problem stopping {} job runner(s): {}", .failed.len(), summarize(.failed))]
    Runners {
        /// Job id and error message of each runner that failed to stop.
        failed: Vec<(String, String)>,
    },

    /// A bounded wait inside the stop sequence ran out.
    #[error("stop timed out waiting for {0}")]
    Timeout(&'static str),
}

impl StopError {
    /// Converts to a dictionary representation, as carried by the
    /// traverser-stopped event.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Runners { failed } => {
                map.insert("type".to_string(), serde_json::json!("RunnerStopFailed"));
                let runners: serde_json::Map<String, serde_json::Value> = failed
                    .iter()
                    .map(|(job_id, msg)| (job_id.clone(), serde_json::json!(msg)))
                    .collect();
                map.insert("runners".to_string(), serde_json::Value::Object(runners));
            }
            Self::Timeout(what) => {
                map.insert("type".to_string(), serde_json::json!("StopTimeout"));
                map.insert("waiting_for".to_string(), serde_json::json!(what));
            }
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

fn summarize(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(job_id, msg)| format!("{job_id} ({msg})"))
        .collect::<Vec<_>>()
        .join(", ")
}
