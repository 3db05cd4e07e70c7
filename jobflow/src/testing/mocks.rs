//! Mock steps for testing.

use crate::cancellation::CancellationToken;
use crate::chain::{Chain, ChainBuilder, NodeOptions};
use crate::context::{Request, StepContext};
use crate::core::{AtomId, State, StepReturn};
use crate::errors::{JobflowError, StepError};
use crate::steps::Step;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A step whose behavior is scripted by the test.
///
/// Each run pops the next scripted state, falling back to the default
/// (`Success` unless changed). Calls are counted and the try numbers the
/// step saw are recorded.
#[derive(Debug)]
pub struct MockStep {
    id: AtomId,
    results: Mutex<VecDeque<State>>,
    default: State,
    delay: Option<Duration>,
    blocking: bool,
    gate: Option<Arc<Notify>>,
    hang_on_stop: bool,
    panic: Option<String>,
    run_error: Option<String>,
    create_error: Option<String>,
    stop_error: Option<String>,
    create_count: AtomicUsize,
    call_count: AtomicUsize,
    stop_count: AtomicUsize,
    tries: Mutex<Vec<(u32, u32)>>,
    stop: CancellationToken,
}

impl MockStep {
    /// Creates a mock step that succeeds.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AtomId::for_type::<Self>("testing", id, ""),
            results: Mutex::new(VecDeque::new()),
            default: State::Success,
            delay: None,
            blocking: false,
            gate: None,
            hang_on_stop: false,
            panic: None,
            run_error: None,
            create_error: None,
            stop_error: None,
            create_count: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            tries: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
        }
    }

    /// Scripts the states of the first runs.
    #[must_use]
    pub fn with_results(self, results: Vec<State>) -> Self {
        *self.results.lock() = results.into();
        self
    }

    /// Sets the state returned once the script is used up.
    #[must_use]
    pub fn with_default(mut self, state: State) -> Self {
        self.default = state;
        self
    }

    /// Makes every run take this long, unless stopped first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every run block until the step is stopped.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Makes every run wait for `gate` to be notified before returning its
    /// scripted state. A stop while waiting ends the run as `Canceled`.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Makes `stop` never return. The run in progress is still canceled.
    #[must_use]
    pub fn with_hanging_stop(mut self) -> Self {
        self.hang_on_stop = true;
        self
    }

    /// Makes every run panic.
    #[must_use]
    pub fn with_panic(mut self, msg: impl Into<String>) -> Self {
        self.panic = Some(msg.into());
        self
    }

    /// Makes every run return an error.
    #[must_use]
    pub fn with_run_error(mut self, msg: impl Into<String>) -> Self {
        self.run_error = Some(msg.into());
        self
    }

    /// Makes `create` fail.
    #[must_use]
    pub fn with_create_error(mut self, msg: impl Into<String>) -> Self {
        self.create_error = Some(msg.into());
        self
    }

    /// Makes `stop` report an error. The step still stops.
    #[must_use]
    pub fn with_stop_error(mut self, msg: impl Into<String>) -> Self {
        self.stop_error = Some(msg.into());
        self
    }

    /// Returns how many times `create` was called.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `run` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `stop` was called.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// Returns `(total_tries, max_tries)` as seen by each run.
    #[must_use]
    pub fn tries_seen(&self) -> Vec<(u32, u32)> {
        self.tries.lock().clone()
    }

    fn next_return(&self) -> StepReturn {
        let state = self.results.lock().pop_front().unwrap_or(self.default);
        match state {
            State::Success => StepReturn::success(),
            State::Fail => StepReturn::fail("scripted failure"),
            other => StepReturn::new(other).with_exit_code(1),
        }
    }
}

#[async_trait]
impl Step for MockStep {
    fn id(&self) -> &AtomId {
        &self.id
    }

    async fn create(&self, _ctx: &StepContext, _req: &Request) -> Result<(), StepError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        match &self.create_error {
            Some(msg) => Err(StepError::Execution(msg.clone())),
            None => Ok(()),
        }
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepReturn, StepError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.tries.lock().push((ctx.total_tries, ctx.max_tries));

        if let Some(msg) = &self.panic {
            panic!("{msg}");
        }
        if let Some(msg) = &self.run_error {
            return Err(StepError::Execution(msg.clone()));
        }
        if self.blocking {
            self.stop.cancelled().await;
            return Ok(StepReturn::new(State::Canceled));
        }
        if let Some(gate) = &self.gate {
            tokio::select! {
                () = gate.notified() => {}
                () = self.stop.cancelled() => return Ok(StepReturn::new(State::Canceled)),
            }
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.stop.cancelled() => return Ok(StepReturn::new(State::Canceled)),
            }
        }
        Ok(self.next_return())
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel("mock stopped");
        if self.hang_on_stop {
            std::future::pending::<()>().await;
        }
        match &self.stop_error {
            Some(msg) => Err(StepError::Stop(msg.clone())),
            None => Ok(()),
        }
    }
}

/// Builds a chain where each step depends on the one before it.
///
/// With `sequence_retry` set, all steps form one sequence started by the
/// first step.
pub async fn linear_chain(
    steps: &[Arc<dyn Step>],
    options: NodeOptions,
    sequence_retry: Option<u32>,
) -> Result<Chain, JobflowError> {
    let mut builder = ChainBuilder::new("linear", 1, Request::new());
    for step in steps {
        builder = builder.add_step(step.clone(), options.clone());
    }
    for pair in steps.windows(2) {
        builder = builder.depends_on(pair[1].id(), pair[0].id());
    }
    if let Some(retry) = sequence_retry {
        let ids: Vec<AtomId> = steps.iter().map(|s| s.id().clone()).collect();
        builder = builder.sequence(&ids, retry);
    }
    builder.build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx(step: &MockStep) -> StepContext {
        StepContext::new(Uuid::new_v4(), step.id().clone()).with_tries(1, 1)
    }

    #[tokio::test]
    async fn test_mock_step_script() {
        let step = MockStep::new("m").with_results(vec![State::Fail, State::Ignored]);
        assert_eq!(step.id().kind, "testing.MockStep");

        assert_eq!(step.run(&ctx(&step)).await.unwrap().state, State::Fail);
        assert_eq!(step.run(&ctx(&step)).await.unwrap().state, State::Ignored);
        assert_eq!(step.run(&ctx(&step)).await.unwrap().state, State::Success);
        assert_eq!(step.call_count(), 3);
        assert_eq!(step.tries_seen(), vec![(1, 1); 3]);
    }

    #[tokio::test]
    async fn test_mock_step_errors() {
        let step = MockStep::new("m")
            .with_create_error("no")
            .with_run_error("bad")
            .with_stop_error("stuck");
        assert!(step.create(&ctx(&step), &Request::new()).await.is_err());
        assert!(step.run(&ctx(&step)).await.is_err());
        assert!(step.stop(&ctx(&step)).await.is_err());
        assert_eq!(step.create_count(), 1);
        assert_eq!(step.stop_count(), 1);
    }

    #[test]
    fn test_mock_step_gate() {
        use tokio_test::{assert_pending, assert_ready, task};

        let gate = Arc::new(Notify::new());
        let step = Arc::new(MockStep::new("m").with_gate(gate.clone()));
        let mut run = task::spawn({
            let step = step.clone();
            async move { step.run(&ctx(&step)).await }
        });
        assert_pending!(run.poll());

        gate.notify_one();
        assert!(run.is_woken());
        let ret = assert_ready!(run.poll());
        assert_eq!(ret.unwrap().state, State::Success);
    }

    #[tokio::test]
    async fn test_mock_step_hanging_stop_cancels_run() {
        let step = MockStep::new("m").blocking().with_hanging_stop();
        let stopped =
            tokio::time::timeout(Duration::from_millis(50), step.stop(&ctx(&step))).await;
        assert!(stopped.is_err());
        assert_eq!(step.stop_count(), 1);
        assert_eq!(step.run(&ctx(&step)).await.unwrap().state, State::Canceled);
    }

    #[tokio::test]
    async fn test_linear_chain_helper() {
        let steps: Vec<Arc<dyn Step>> = vec![
            Arc::new(MockStep::new("a")),
            Arc::new(MockStep::new("b")),
            Arc::new(MockStep::new("c")),
        ];
        let chain = linear_chain(&steps, NodeOptions::new(), Some(2)).await.unwrap();
        assert_eq!(chain.dag().len(), 3);
        let c = chain.dag().get_node(steps[2].id()).unwrap();
        assert_eq!(c.upstream(), vec![steps[1].id().clone()]);
        assert_eq!(c.sequence_id(), Some(steps[0].id()));
        assert_eq!(chain.runnable_jobs().len(), 1);
    }
}
