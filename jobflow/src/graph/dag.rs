//! Graph and vertex types.

use crate::core::AtomId;
use crate::errors::GraphError;
use crate::steps::Step;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Edges {
    next: HashSet<AtomId>,
    prev: HashSet<AtomId>,
}

/// A vertex of the graph: a step plus its retry settings and edges.
pub struct Node {
    datum: Arc<dyn Step>,
    edges: RwLock<Edges>,
    name: String,
    retry: u32,
    retry_wait: Duration,
    sequence_id: Option<AtomId>,
    sequence_retry: u32,
}

impl Node {
    /// Creates a node wrapping a step.
    ///
    /// `retry` is the number of extra tries a single run of the job gets;
    /// `retry_wait` is the pause between them.
    #[must_use]
    pub fn new(step: Arc<dyn Step>, name: impl Into<String>, retry: u32, retry_wait: Duration) -> Self {
        Self {
            datum: step,
            edges: RwLock::new(Edges::default()),
            name: name.into(),
            retry,
            retry_wait,
            sequence_id: None,
            sequence_retry: 0,
        }
    }

    /// Places the node in the sequence starting at `sequence_id`.
    ///
    /// `sequence_retry` is only read on the sequence's first node.
    #[must_use]
    pub fn with_sequence(mut self, sequence_id: AtomId, sequence_retry: u32) -> Self {
        self.sequence_id = Some(sequence_id);
        self.sequence_retry = sequence_retry;
        self
    }

    /// Returns the node's key.
    #[must_use]
    pub fn id(&self) -> &AtomId {
        self.datum.id()
    }

    /// Returns the step stored at this node.
    #[must_use]
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.datum
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the per-run retry budget.
    #[must_use]
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Returns the pause between tries.
    #[must_use]
    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    /// Returns the id of the first node of this node's sequence, if any.
    #[must_use]
    pub fn sequence_id(&self) -> Option<&AtomId> {
        self.sequence_id.as_ref()
    }

    /// Returns the sequence retry budget.
    #[must_use]
    pub fn sequence_retry(&self) -> u32 {
        self.sequence_retry
    }

    /// Registers the edge `upstream -> self` on both endpoints.
    ///
    /// Both edge locks are taken in key order, so concurrent registrations
    /// on overlapping nodes cannot deadlock.
    pub fn set_upstream(&self, upstream: &Self) -> Result<(), GraphError> {
        if self.id() == upstream.id() {
            return Err(GraphError::SelfLoop(self.id().clone()));
        }

        let (mut own, mut up) = if self.id() < upstream.id() {
            let own = self.edges.write();
            (own, upstream.edges.write())
        } else {
            let up = upstream.edges.write();
            (self.edges.write(), up)
        };

        if own.prev.contains(upstream.id()) {
            return Err(GraphError::AlreadyRegisteredUpstream {
                node: self.id().clone(),
                upstream: upstream.id().clone(),
            });
        }
        if up.next.contains(self.id()) {
            return Err(GraphError::AlreadyRegisteredDownstream {
                node: self.id().clone(),
                upstream: upstream.id().clone(),
            });
        }
        own.prev.insert(upstream.id().clone());
        up.next.insert(self.id().clone());
        Ok(())
    }

    /// Returns the keys of the node's predecessors.
    #[must_use]
    pub fn upstream(&self) -> Vec<AtomId> {
        self.edges.read().prev.iter().cloned().collect()
    }

    /// Returns the keys of the node's successors.
    #[must_use]
    pub fn downstream(&self) -> Vec<AtomId> {
        self.edges.read().next.iter().cloned().collect()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges = self.edges.read();
        f.debug_struct("Node")
            .field("id", self.id())
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("retry_wait", &self.retry_wait)
            .field("sequence_id", &self.sequence_id)
            .field("sequence_retry", &self.sequence_retry)
            .field("next", &edges.next.len())
            .field("prev", &edges.prev.len())
            .finish()
    }
}

/// A directed acyclic graph of nodes.
#[derive(Debug)]
pub struct Dag {
    name: String,
    version: u32,
    vertices: RwLock<HashMap<AtomId, Arc<Node>>>,
}

impl Dag {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            vertices: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the graph version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Adds a node. Nodes are never removed.
    pub fn add_node(&self, node: Node) -> Result<Arc<Node>, GraphError> {
        let mut vertices = self.vertices.write();
        if vertices.contains_key(node.id()) {
            return Err(GraphError::AlreadyRegisteredNode(node.id().clone()));
        }
        let node = Arc::new(node);
        vertices.insert(node.id().clone(), node.clone());
        Ok(node)
    }

    /// Looks up a node.
    pub fn get_node(&self, id: &AtomId) -> Result<Arc<Node>, GraphError> {
        self.vertices
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NotRegisteredNode(id.clone()))
    }

    /// Looks up a node that construction guarantees exists.
    ///
    /// # Panics
    ///
    /// Panics if the node is not registered.
    #[must_use]
    pub fn must_get_node(&self, id: &AtomId) -> Arc<Node> {
        match self.vertices.read().get(id) {
            Some(node) => node.clone(),
            None => panic!("{}", GraphError::NotRegisteredNode(id.clone())),
        }
    }

    /// Registers the edge `upstream -> node`.
    pub fn set_upstream(&self, node: &AtomId, upstream: &AtomId) -> Result<(), GraphError> {
        let vertices = self.vertices.read();
        let current = vertices
            .get(node)
            .ok_or_else(|| GraphError::NotRegisteredNode(node.clone()))?;
        let up = vertices
            .get(upstream)
            .ok_or_else(|| GraphError::NotRegisteredNode(upstream.clone()))?;
        current.set_upstream(up)
    }

    /// Returns the keys of all nodes.
    #[must_use]
    pub fn node_ids(&self) -> Vec<AtomId> {
        self.vertices.read().keys().cloned().collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.read().len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.read().is_empty()
    }

    /// Takes the graph-wide read lock, for callers that need a consistent
    /// view of several nodes at once.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<AtomId, Arc<Node>>> {
        self.vertices.read()
    }
}
