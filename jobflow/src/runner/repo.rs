//! Concurrent registry of active runners.

use super::Runner;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds the runner of every job currently executing, keyed by job id.
///
/// Safe to use from many tasks at once without outside locking.
#[derive(Default)]
pub struct RunnerRepo {
    runners: DashMap<String, Arc<dyn Runner>>,
}

impl RunnerRepo {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a runner, replacing any previous one for the job.
    pub fn set(&self, job_id: impl Into<String>, runner: Arc<dyn Runner>) {
        self.runners.insert(job_id.into(), runner);
    }

    /// Returns the runner for a job, if one is registered.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(job_id).map(|r| r.value().clone())
    }

    /// Removes the runner for a job.
    pub fn remove(&self, job_id: &str) {
        self.runners.remove(job_id);
    }

    /// Returns a snapshot of every registered runner.
    #[must_use]
    pub fn items(&self) -> HashMap<String, Arc<dyn Runner>> {
        self.runners
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Returns the number of registered runners.
    #[must_use]
    pub fn count(&self) -> usize {
        self.runners.len()
    }

    /// Returns true if no runner is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl std::fmt::Debug for RunnerRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.runners.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        f.debug_struct("RunnerRepo").field("jobs", &ids).finish()
    }
}
