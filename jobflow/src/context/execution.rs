//! Per-call context handed to steps.

use crate::core::AtomId;
use uuid::Uuid;

/// The context a step receives on `create`, `run` and `stop`.
///
/// Carries identity and retry bookkeeping explicitly; steps never look
/// anything up in ambient global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// Id of the request the chain was built for.
    pub request_id: Uuid,
    /// Id of the job being created, run or stopped.
    pub job_id: AtomId,
    /// Cumulative try number of the current attempt, across sequence retries.
    /// Zero outside of `run`.
    pub total_tries: u32,
    /// Maximum tries for one runner invocation. Zero outside of `run`.
    pub max_tries: u32,
}

impl StepContext {
    /// Creates a context with no try bookkeeping.
    #[must_use]
    pub fn new(request_id: Uuid, job_id: AtomId) -> Self {
        Self {
            request_id,
            job_id,
            total_tries: 0,
            max_tries: 0,
        }
    }

    /// Sets the try bookkeeping.
    #[must_use]
    pub fn with_tries(mut self, total_tries: u32, max_tries: u32) -> Self {
        self.total_tries = total_tries;
        self.max_tries = max_tries;
        self
    }

    /// Returns true if this is the first try of the job across all retries.
    #[must_use]
    pub fn is_first_try(&self) -> bool {
        self.total_tries <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_context_tries() {
        let ctx = StepContext::new(Uuid::new_v4(), AtomId::new("t.Noop", "1", ""));
        assert_eq!(ctx.total_tries, 0);
        assert!(ctx.is_first_try());

        let ctx = ctx.with_tries(3, 4);
        assert_eq!(ctx.max_tries, 4);
        assert!(!ctx.is_first_try());
    }
}
