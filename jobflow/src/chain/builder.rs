//! Builder for assembling chains.

use super::{Chain, Job};
use crate::context::{Request, StepContext};
use crate::core::AtomId;
use crate::errors::{GraphError, JobflowError};
use crate::graph::{Dag, Node};
use crate::steps::Step;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-node settings given when a step is added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOptions {
    /// Display name. Defaults to the step's local id.
    pub name: Option<String>,
    /// Extra tries a single run of the job gets.
    pub retry: u32,
    /// Pause between tries.
    pub retry_wait: Duration,
}

impl NodeOptions {
    /// Creates default options: no retries, no wait.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pause between tries.
    #[must_use]
    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }
}

/// Builder for chains.
///
/// Steps, edges and sequences are collected first; [`ChainBuilder::build`]
/// creates every step from the request and only then registers the graph,
/// so a step that fails to set itself up aborts before anything runs.
#[derive(Debug)]
pub struct ChainBuilder {
    name: String,
    version: u32,
    request: Request,
    steps: Vec<(Arc<dyn Step>, NodeOptions)>,
    edges: Vec<(AtomId, AtomId)>,
    sequences: Vec<(Vec<AtomId>, u32)>,
}

impl ChainBuilder {
    /// Creates a builder for a graph with the given name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32, request: Request) -> Self {
        Self {
            name: name.into(),
            version,
            request,
            steps: Vec::new(),
            edges: Vec::new(),
            sequences: Vec::new(),
        }
    }

    /// Adds a step as a node of the graph.
    #[must_use]
    pub fn add_step(mut self, step: Arc<dyn Step>, options: NodeOptions) -> Self {
        self.steps.push((step, options));
        self
    }

    /// Makes `node` run after `upstream`.
    #[must_use]
    pub fn depends_on(mut self, node: &AtomId, upstream: &AtomId) -> Self {
        self.edges.push((node.clone(), upstream.clone()));
        self
    }

    /// Groups nodes into a retry sequence started by the first id.
    ///
    /// When a member fails for good, the members that already completed
    /// and the failed one are rolled back and the sequence reruns from its
    /// first node, up to `sequence_retry` times. Edges are not implied;
    /// declare them with [`ChainBuilder::depends_on`].
    #[must_use]
    pub fn sequence(mut self, ids: &[AtomId], sequence_retry: u32) -> Self {
        if !ids.is_empty() {
            self.sequences.push((ids.to_vec(), sequence_retry));
        }
        self
    }

    /// Returns the number of steps added so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Creates every step and assembles the chain.
    pub async fn build(self) -> Result<Chain, JobflowError> {
        for (step, _) in &self.steps {
            let ctx = StepContext::new(self.request.request_id, step.id().clone());
            step.create(&ctx, &self.request).await?;
        }

        let membership = self.sequence_membership()?;

        let dag = Dag::new(self.name, self.version);
        for (step, options) in &self.steps {
            let name = options.name.clone().unwrap_or_else(|| step.id().id.clone());
            let mut node = Node::new(step.clone(), name, options.retry, options.retry_wait);
            if let Some((start, retry)) = membership.get(step.id()) {
                node = node.with_sequence(start.clone(), *retry);
            }
            dag.add_node(node)?;
        }

        for ids in self.sequences.iter().map(|(ids, _)| ids) {
            for id in ids {
                dag.get_node(id)?;
            }
        }

        let chain = Chain::new(dag, self.request.request_id);
        for (node, upstream) in &self.edges {
            chain.set_upstream(node, upstream)?;
        }
        for (step, _) in self.steps {
            chain.add_job(Job::new(step))?;
        }

        debug!(
            chain = chain.dag().name(),
            request_id = %chain.request_id(),
            jobs = chain.dag().len(),
            "Chain built"
        );
        Ok(chain)
    }

    /// Maps each sequence member to its start id and the retry budget it
    /// carries. Only the start carries the budget.
    fn sequence_membership(&self) -> Result<HashMap<AtomId, (AtomId, u32)>, GraphError> {
        let mut membership = HashMap::new();
        for (ids, retry) in &self.sequences {
            let start = &ids[0];
            for id in ids {
                let budget = if id == start { *retry } else { 0 };
                if membership.insert(id.clone(), (start.clone(), budget)).is_some() {
                    return Err(GraphError::AlreadyInSequence(id.clone()));
                }
            }
        }
        Ok(membership)
    }
}
