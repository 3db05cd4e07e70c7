//! Builtin steps.

use super::{Step, BUILTIN_NAMESPACE};
use crate::cancellation::CancellationToken;
use crate::context::{Request, StepContext};
use crate::core::{AtomId, State, StepReturn};
use crate::errors::StepError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// A step that does nothing and succeeds.
#[derive(Debug, Clone)]
pub struct NoopStep {
    id: AtomId,
}

impl NoopStep {
    /// Creates a no-op step.
    #[must_use]
    pub fn new(id: impl Into<String>, expansion_digest: impl Into<String>) -> Self {
        Self {
            id: AtomId::for_type::<Self>(BUILTIN_NAMESPACE, id, expansion_digest),
        }
    }
}

#[async_trait]
impl Step for NoopStep {
    fn id(&self) -> &AtomId {
        &self.id
    }

    async fn create(&self, _ctx: &StepContext, _req: &Request) -> Result<(), StepError> {
        Ok(())
    }

    async fn run(&self, _ctx: &StepContext) -> Result<StepReturn, StepError> {
        Ok(StepReturn::success())
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }
}

/// Default sleep duration when neither the builder nor the request sets one.
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(1);

/// A step that sleeps for a given time.
///
/// The request argument `duration_ms` overrides the configured duration.
/// Stopping interrupts the sleep and the run returns [`State::Canceled`].
#[derive(Debug)]
pub struct SleepStep {
    id: AtomId,
    duration: Mutex<Duration>,
    stop: CancellationToken,
}

impl SleepStep {
    /// Creates a sleep step with the default duration.
    #[must_use]
    pub fn new(id: impl Into<String>, expansion_digest: impl Into<String>) -> Self {
        Self {
            id: AtomId::for_type::<Self>(BUILTIN_NAMESPACE, id, expansion_digest),
            duration: Mutex::new(DEFAULT_SLEEP),
            stop: CancellationToken::new(),
        }
    }

    /// Sets how long to sleep.
    #[must_use]
    pub fn with_duration(self, duration: Duration) -> Self {
        *self.duration.lock() = duration;
        self
    }

    /// Returns how long the step sleeps.
    #[must_use]
    pub fn duration(&self) -> Duration {
        *self.duration.lock()
    }
}

#[async_trait]
impl Step for SleepStep {
    fn id(&self) -> &AtomId {
        &self.id
    }

    async fn create(&self, _ctx: &StepContext, req: &Request) -> Result<(), StepError> {
        if req.arg("duration_ms").is_some() {
            let ms = req.arg_i64("duration_ms")?;
            let ms = u64::try_from(ms)
                .map_err(|_| StepError::invalid_argument("duration_ms", "must not be negative"))?;
            *self.duration.lock() = Duration::from_millis(ms);
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepReturn, StepError> {
        let duration = self.duration();
        debug!(job_id = %ctx.job_id, duration = ?duration, "Sleeping");

        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(StepReturn::success()),
            () = self.stop.cancelled() => Ok(StepReturn::new(State::Canceled)),
        }
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.stop.cancel("sleep stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(step: &dyn Step) -> StepContext {
        StepContext::new(Uuid::new_v4(), step.id().clone())
    }

    #[tokio::test]
    async fn test_noop_succeeds() {
        let step = NoopStep::new("noop", "");
        assert_eq!(step.id().kind, "builtin.NoopStep");

        let ret = step.run(&ctx(&step)).await.unwrap();
        assert_eq!(ret.state, State::Success);
        assert_eq!(ret.exit_code, 0);
    }

    #[tokio::test]
    async fn test_sleep_reads_duration_arg() {
        let step = SleepStep::new("sleep", "");
        assert_eq!(step.duration(), DEFAULT_SLEEP);

        let req = Request::new().with_arg("duration_ms", json!(5));
        step.create(&ctx(&step), &req).await.unwrap();
        assert_eq!(step.duration(), Duration::from_millis(5));

        let ret = step.run(&ctx(&step)).await.unwrap();
        assert_eq!(ret.state, State::Success);
    }

    #[tokio::test]
    async fn test_sleep_rejects_negative_duration() {
        let step = SleepStep::new("sleep", "");
        let req = Request::new().with_arg("duration_ms", json!(-1));
        assert!(matches!(
            step.create(&ctx(&step), &req).await,
            Err(StepError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_sleep_stop_cancels_run() {
        let step = Arc::new(SleepStep::new("sleep", "").with_duration(Duration::from_secs(30)));
        let run_ctx = ctx(step.as_ref());

        let running = {
            let step = step.clone();
            tokio::spawn(async move { step.run(&run_ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        step.stop(&ctx(step.as_ref())).await.unwrap();
        // Stopping twice is harmless.
        step.stop(&ctx(step.as_ref())).await.unwrap();

        let ret = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("run should return after stop")
            .unwrap()
            .unwrap();
        assert_eq!(ret.state, State::Canceled);
    }
}
