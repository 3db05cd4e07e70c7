//! The chain: a graph plus live job states and try counters.

use super::{Job, JobReport};
use crate::core::{AtomId, State};
use crate::errors::GraphError;
use crate::graph::{Dag, Node};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A job chain: one execution of a graph for one request.
///
/// Lock order is graph vertices, then node edges, then jobs, then tries.
/// Methods never hold a lock while calling back into another method that
/// takes the same lock.
#[derive(Debug)]
pub struct Chain {
    dag: Dag,
    request_id: Uuid,
    jobs: RwLock<HashMap<AtomId, Job>>,
    /// Attempts of a whole sequence, keyed by the sequence start job.
    sequence_tries: Mutex<HashMap<AtomId, u32>>,
    /// Tries of each job across all sequence retries. Never reset.
    job_tries: Mutex<HashMap<AtomId, u32>>,
}

impl Chain {
    /// Creates a chain over a graph, with no jobs yet.
    #[must_use]
    pub fn new(dag: Dag, request_id: Uuid) -> Self {
        Self {
            dag,
            request_id,
            jobs: RwLock::new(HashMap::new()),
            sequence_tries: Mutex::new(HashMap::new()),
            job_tries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Returns the id of the request this chain runs for.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Adds a node to the graph.
    pub fn add_node(&self, node: Node) -> Result<Arc<Node>, GraphError> {
        self.dag.add_node(node)
    }

    /// Registers the edge `upstream -> node`.
    pub fn set_upstream(&self, node: &AtomId, upstream: &AtomId) -> Result<(), GraphError> {
        self.dag.set_upstream(node, upstream)
    }

    /// Adds the job for a registered node, in state [`State::Unknown`].
    pub fn add_job(&self, job: Job) -> Result<(), GraphError> {
        let id = job.id().clone();
        self.dag.get_node(&id)?;
        self.jobs.write().insert(id, job);
        Ok(())
    }

    /// Returns the state of a job, if the chain has it.
    #[must_use]
    pub fn job_state(&self, id: &AtomId) -> Option<State> {
        self.jobs.read().get(id).map(|j| j.state)
    }

    /// Sets the state of a job.
    ///
    /// # Panics
    ///
    /// Panics if the job is not in the chain.
    pub fn set_job_state(&self, id: &AtomId, state: State) {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) => job.state = state,
            None => panic!("job {id} not found in chain"),
        }
    }

    /// Returns a snapshot of every job, ordered by id.
    #[must_use]
    pub fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.id().cmp(b.id()));
        jobs
    }

    /// Returns a report of every job, ordered by id.
    #[must_use]
    pub fn report(&self) -> Vec<JobReport> {
        self.all_jobs().iter().map(Job::report).collect()
    }

    /// Returns the jobs directly downstream of a job.
    #[must_use]
    pub fn next_jobs(&self, id: &AtomId) -> Vec<Job> {
        let downstream = self.dag.must_get_node(id).downstream();
        let jobs = self.jobs.read();
        downstream
            .iter()
            .map(|next| match jobs.get(next) {
                Some(job) => job.clone(),
                None => panic!("job {next} not found in chain"),
            })
            .collect()
    }

    /// Returns true if the job may be dispatched: its state is dispatchable
    /// and every predecessor is complete.
    #[must_use]
    pub fn is_runnable(&self, id: &AtomId) -> bool {
        let vertices = self.dag.read();
        let jobs = self.jobs.read();
        is_runnable(&vertices, &jobs, id)
    }

    /// Returns every runnable job, ordered by id.
    #[must_use]
    pub fn runnable_jobs(&self) -> Vec<Job> {
        let vertices = self.dag.read();
        let jobs = self.jobs.read();
        let mut runnable: Vec<Job> = jobs
            .values()
            .filter(|job| is_runnable(&vertices, &jobs, job.id()))
            .cloned()
            .collect();
        runnable.sort_by(|a, b| a.id().cmp(b.id()));
        runnable
    }

    /// Reports whether the chain is done running and whether it completed.
    ///
    /// The chain is done when no job is running, waiting, rolled back for
    /// retry, or still reachable and not yet run. It is complete when every
    /// job is complete. A failed branch leaves `complete` false without
    /// keeping independent branches from finishing.
    #[must_use]
    pub fn is_done_running(&self) -> (bool, bool) {
        let vertices = self.dag.read();
        let jobs = self.jobs.read();
        let mut complete = true;
        for job in jobs.values() {
            if job.state.is_complete() {
                continue;
            }
            if job.state == State::Unknown {
                if is_runnable(&vertices, &jobs, job.id()) {
                    return (false, false);
                }
            } else if job.state.is_undone() {
                return (false, false);
            }
            complete = false;
        }
        (true, complete)
    }

    /// Returns the first job of the job's sequence, if it is in one.
    #[must_use]
    pub fn sequence_start_job(&self, id: &AtomId) -> Option<Job> {
        let node = self.dag.must_get_node(id);
        let start = node.sequence_id()?;
        self.jobs.read().get(start).cloned()
    }

    /// Returns true if the job starts its sequence.
    #[must_use]
    pub fn is_sequence_start_job(&self, id: &AtomId) -> bool {
        self.dag.must_get_node(id).sequence_id() == Some(id)
    }

    /// Returns true if the job's sequence may be retried.
    ///
    /// The budget is inclusive: with `sequence_retry` of 1 a sequence runs
    /// at most twice. A job in no sequence cannot be retried this way.
    #[must_use]
    pub fn can_retry_sequence(&self, id: &AtomId) -> bool {
        let Some(start) = self.dag.must_get_node(id).sequence_id().cloned() else {
            return false;
        };
        let budget = self.dag.must_get_node(&start).sequence_retry();
        let tries = self.sequence_tries.lock().get(&start).copied().unwrap_or(0);
        tries <= budget
    }

    /// Adds to the job's cumulative try count.
    pub fn increment_job_tries(&self, id: &AtomId, delta: u32) {
        let mut tries = self.job_tries.lock();
        let count = tries.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(delta);
    }

    /// Returns the job's cumulative try count.
    #[must_use]
    pub fn job_tries(&self, id: &AtomId) -> u32 {
        self.job_tries.lock().get(id).copied().unwrap_or(0)
    }

    /// Adds to the try count of the job's sequence. No-op outside a sequence.
    pub fn increment_sequence_tries(&self, id: &AtomId, delta: u32) {
        let node = self.dag.must_get_node(id);
        let Some(start) = node.sequence_id() else {
            return;
        };
        let mut tries = self.sequence_tries.lock();
        let count = tries.entry(start.clone()).or_insert(0);
        *count = count.saturating_add(delta);
    }

    /// Returns the try count of the job's sequence.
    #[must_use]
    pub fn sequence_tries(&self, id: &AtomId) -> u32 {
        let node = self.dag.must_get_node(id);
        node.sequence_id()
            .and_then(|start| self.sequence_tries.lock().get(start).copied())
            .unwrap_or(0)
    }

    /// Resets every listed job to [`State::UpForRetry`] under one write lock.
    ///
    /// Observers never see a partially rolled back sequence.
    ///
    /// # Panics
    ///
    /// Panics if a job is not in the chain.
    pub fn rollback_to_retry(&self, ids: &[AtomId]) {
        let mut jobs = self.jobs.write();
        for id in ids {
            match jobs.get_mut(id) {
                Some(job) => job.state = State::UpForRetry,
                None => panic!("job {id} not found in chain"),
            }
        }
    }
}

/// Caller holds the vertex and job read locks.
fn is_runnable(
    vertices: &HashMap<AtomId, Arc<Node>>,
    jobs: &HashMap<AtomId, Job>,
    id: &AtomId,
) -> bool {
    let Some(job) = jobs.get(id) else {
        panic!("job {id} not found in chain");
    };
    if !job.state.is_dispatchable() {
        return false;
    }
    let Some(node) = vertices.get(id) else {
        panic!("{}", GraphError::NotRegisteredNode(id.clone()));
    };
    node.upstream()
        .iter()
        .all(|prev| jobs.get(prev).is_some_and(|j| j.state.is_complete()))
}
