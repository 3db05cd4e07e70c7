//! Job lifecycle states and the state classes the engine schedules on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Completed successfully.
    Success,
    /// Failed.
    Fail,
    /// The step raised a fault while running.
    Exception,
    /// Stopped by request.
    Stopped,
    /// Currently running.
    Running,
    /// Canceled.
    Canceled,
    /// Waiting for input.
    WaitInput,
    /// Marked as skipped by a user.
    MarkSkipped,
    /// Ignored due to a condition.
    Ignored,
    /// Rolled back by a sequence retry.
    UpForRetry,
    /// Marked for retry by a user.
    MarkRetry,
    /// Not yet run.
    Unknown,
}

impl Default for State {
    fn default() -> Self {
        Self::Unknown
    }
}

impl State {
    /// Every state, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Success,
        Self::Fail,
        Self::Exception,
        Self::Stopped,
        Self::Running,
        Self::Canceled,
        Self::WaitInput,
        Self::MarkSkipped,
        Self::Ignored,
        Self::UpForRetry,
        Self::MarkRetry,
        Self::Unknown,
    ];

    /// Returns true for states that unlock successor jobs.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Success | Self::MarkSkipped | Self::Ignored)
    }

    /// Returns true for states that keep a chain from being done.
    #[must_use]
    pub fn is_undone(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::WaitInput | Self::UpForRetry | Self::MarkRetry | Self::Unknown
        )
    }

    /// Returns true for terminal states, as reported to callers.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Fail
                | Self::Stopped
                | Self::Exception
                | Self::Canceled
                | Self::MarkSkipped
                | Self::Ignored
        )
    }

    /// Returns true if a job in this state may be dispatched, given its
    /// predecessors are complete.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Unknown | Self::UpForRetry | Self::MarkRetry)
    }

    /// Returns the upper-case text name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::Exception => "EXCEPTION",
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Canceled => "CANCELED",
            Self::WaitInput => "WAIT_INPUT",
            Self::MarkSkipped => "MARK_SKIPPED",
            Self::Ignored => "IGNORED",
            Self::UpForRetry => "UP_FOR_RETRY",
            Self::MarkRetry => "MARK_RETRY",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a state from its text name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
