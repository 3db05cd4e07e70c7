//! Binary-search number guessing step.

use super::{Step, EXAMPLE_NAMESPACE};
use crate::context::{Request, StepContext};
use crate::core::{AtomId, StepReturn};
use crate::errors::StepError;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Lowest possible secret.
pub const LOW: i64 = 0;
/// Highest possible secret.
pub const HIGH: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    secret: i64,
    low: i64,
    high: i64,
}

/// Guesses a secret number by binary search, one guess per run.
///
/// Each run guesses the midpoint of the remaining range. A wrong guess
/// narrows the range and fails with exit code 1, so the job only
/// succeeds if its retry budget covers the search.
#[derive(Debug)]
pub struct NumberGuessStep {
    id: AtomId,
    bounds: Mutex<Bounds>,
}

impl NumberGuessStep {
    /// Creates a number guessing step. The secret is read in `create`.
    #[must_use]
    pub fn new(id: impl Into<String>, expansion_digest: impl Into<String>) -> Self {
        Self {
            id: AtomId::for_type::<Self>(EXAMPLE_NAMESPACE, id, expansion_digest),
            bounds: Mutex::new(Bounds {
                secret: LOW,
                low: LOW,
                high: HIGH,
            }),
        }
    }

    /// Returns the remaining `(low, high)` range.
    #[must_use]
    pub fn range(&self) -> (i64, i64) {
        let bounds = self.bounds.lock();
        (bounds.low, bounds.high)
    }
}

#[async_trait]
impl Step for NumberGuessStep {
    fn id(&self) -> &AtomId {
        &self.id
    }

    async fn create(&self, ctx: &StepContext, req: &Request) -> Result<(), StepError> {
        let secret = req.arg_i64("secret")?;
        if !(LOW..=HIGH).contains(&secret) {
            return Err(StepError::invalid_argument(
                "secret",
                format!("must be within {LOW}..={HIGH}, got {secret}"),
            ));
        }
        *self.bounds.lock() = Bounds {
            secret,
            low: LOW,
            high: HIGH,
        };
        info!(job_id = %ctx.job_id, secret, "Secret chosen");
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepReturn, StepError> {
        let mut bounds = self.bounds.lock();
        let guess = (bounds.low + bounds.high) / 2;
        info!(job_id = %ctx.job_id, total_tries = ctx.total_tries, guess, "Guessing");

        if guess == bounds.secret {
            return Ok(StepReturn::success());
        }
        if guess < bounds.secret {
            bounds.low = guess + 1;
        } else {
            bounds.high = guess - 1;
        }
        Ok(StepReturn::fail(format!("guess {guess} is wrong")))
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }
}
