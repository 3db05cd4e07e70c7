//! Jobs and job reports.

use crate::core::{AtomId, State};
use crate::steps::Step;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A step paired with its lifecycle state in one chain execution.
#[derive(Debug, Clone)]
pub struct Job {
    /// The step this job runs.
    pub step: Arc<dyn Step>,
    /// The job's current state.
    pub state: State,
}

impl Job {
    /// Creates a job in state [`State::Unknown`].
    #[must_use]
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self {
            step,
            state: State::Unknown,
        }
    }

    /// Returns the job's key, which is its step's id.
    #[must_use]
    pub fn id(&self) -> &AtomId {
        self.step.id()
    }

    /// Returns a serializable snapshot of the job.
    #[must_use]
    pub fn report(&self) -> JobReport {
        JobReport {
            step: self.id().clone(),
            state: self.state,
            state_text: self.state.to_string(),
            done: self.state.is_done(),
        }
    }
}

/// What callers see of a job when reporting final status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// The step's identity.
    #[serde(rename = "Atom")]
    pub step: AtomId,
    /// The job's state.
    #[serde(rename = "State")]
    pub state: State,
    /// The state's text name.
    #[serde(rename = "StateText")]
    pub state_text: String,
    /// True when the state is final for this run.
    #[serde(rename = "Done")]
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NoopStep;
    use serde_json::json;

    #[test]
    fn test_job_report_serialization() {
        let mut job = Job::new(Arc::new(NoopStep::new("n1", "")));
        assert_eq!(job.state, State::Unknown);
        job.state = State::Success;

        let value = serde_json::to_value(job.report()).unwrap();
        assert_eq!(
            value,
            json!({
                "Atom": {"type": "builtin.NoopStep", "id": "n1", "expansion_digest": ""},
                "State": "SUCCESS",
                "StateText": "SUCCESS",
                "Done": true,
            })
        );
    }

    #[test]
    fn test_job_report_done_flag() {
        let mut job = Job::new(Arc::new(NoopStep::new("n1", "")));
        for (state, done) in [
            (State::Fail, true),
            (State::Canceled, true),
            (State::Running, false),
            (State::UpForRetry, false),
        ] {
            job.state = state;
            assert_eq!(job.report().done, done, "{state}");
        }
    }
}
