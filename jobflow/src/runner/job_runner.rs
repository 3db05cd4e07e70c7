//! The per-job retry loop.

use super::Runner;
use crate::cancellation::CancellationToken;
use crate::context::StepContext;
use crate::core::{AtomId, State, StepReturn};
use crate::errors::StepError;
use crate::steps::Step;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a runner reports when it returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReturn {
    /// The final step return. Decides how the chain continues.
    pub step_return: StepReturn,
    /// Tries performed by this run, not counting earlier runs.
    pub tries: u32,
}

/// Runs one job with its retry budget.
#[derive(Debug)]
pub struct JobRunner {
    step: Arc<dyn Step>,
    job_name: String,
    request_id: Uuid,
    /// Tries the job had before this run, across sequence retries.
    prior_tries: u32,
    max_tries: u32,
    retry_wait: Duration,
    stop: CancellationToken,
    started_at: DateTime<Utc>,
}

impl JobRunner {
    /// Creates a runner.
    ///
    /// `prior_tries` is the job's cumulative try count so far. The job gets
    /// `1 + retry` tries in this run, with `retry_wait` between them.
    #[must_use]
    pub fn new(
        step: Arc<dyn Step>,
        job_name: impl Into<String>,
        request_id: Uuid,
        prior_tries: u32,
        retry: u32,
        retry_wait: Duration,
    ) -> Self {
        Self {
            step,
            job_name: job_name.into(),
            request_id,
            prior_tries,
            max_tries: retry.saturating_add(1),
            retry_wait,
            stop: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Returns the id of the job being run.
    #[must_use]
    pub fn job_id(&self) -> &AtomId {
        self.step.id()
    }

    /// Returns the maximum tries for this run.
    #[must_use]
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Returns when the runner was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns true once stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn context(&self, total_tries: u32) -> StepContext {
        StepContext::new(self.request_id, self.job_id().clone()).with_tries(total_tries, self.max_tries)
    }

    /// Runs the step once. A panic inside the step becomes an `Exception`
    /// return and an `Err` becomes a `Fail` return.
    async fn run_step(&self, ctx: &StepContext) -> StepReturn {
        match AssertUnwindSafe(self.step.run(ctx)).catch_unwind().await {
            Ok(Ok(ret)) => ret,
            Ok(Err(e)) => StepReturn::fail(e.to_string()),
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(
                    request_id = %self.request_id,
                    job_id = %self.job_id(),
                    panic = %msg,
                    "Panic from step run"
                );
                StepReturn::exception(format!("panic from step run: {msg}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Runner for JobRunner {
    async fn run(&self) -> RunReturn {
        let mut tries = 0;
        let mut final_return = StepReturn::new(State::Unknown);

        while tries < self.max_tries {
            let total_tries = self.prior_tries + tries + 1;

            if self.stop.is_cancelled() {
                info!(
                    request_id = %self.request_id,
                    job_id = %self.job_id(),
                    total_tries,
                    tries,
                    max_tries = self.max_tries,
                    "Job stopped before start"
                );
                break;
            }

            info!(
                request_id = %self.request_id,
                job_id = %self.job_id(),
                job_name = %self.job_name,
                total_tries,
                tries = tries + 1,
                max_tries = self.max_tries,
                "Job start"
            );
            let ctx = self.context(total_tries);
            let started = Instant::now();
            let ret = self.run_step(&ctx).await;
            tries += 1;

            info!(
                request_id = %self.request_id,
                job_id = %self.job_id(),
                runtime_ms = started.elapsed().as_secs_f64() * 1000.0,
                state = %ret.state,
                exit = ret.exit_code,
                error = ret.error.as_deref().unwrap_or(""),
                "Job return"
            );

            let state = ret.state;
            final_return = ret;
            if matches!(state, State::Success | State::Stopped) {
                break;
            }

            warn!(
                request_id = %self.request_id,
                job_id = %self.job_id(),
                try_left = self.max_tries - tries,
                "Job failed"
            );
            if tries == self.max_tries {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.retry_wait) => {}
                () = self.stop.cancelled() => {
                    info!(
                        request_id = %self.request_id,
                        job_id = %self.job_id(),
                        total_tries = self.prior_tries + tries,
                        "Job stopped while waiting to run try"
                    );
                    break;
                }
            }
        }

        RunReturn {
            step_return: final_return,
            // A runner stopped before its first try still counts as one.
            tries: tries.max(1),
        }
    }

    async fn stop(&self) -> Result<(), StepError> {
        if !self.stop.cancel("job runner stopped") {
            return Ok(());
        }
        info!(
            request_id = %self.request_id,
            job_id = %self.job_id(),
            running_since = %self.started_at,
            "Stopping the job"
        );
        let ctx = self.context(self.prior_tries);
        self.step.stop(&ctx).await
    }
}
