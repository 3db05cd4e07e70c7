//! Configuration types for the traverser and logging.

use crate::errors::JobflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds used by the traverser while running and stopping a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverserConfig {
    /// How long `stop` waits for in-flight jobs to register their runners,
    /// and then for all runners to stop, in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: f64,
    /// How long a finished job waits to be handed to the reaper, in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: f64,
    /// How long `run` waits for a concurrent stop to complete, in seconds.
    #[serde(default = "default_shutdown_wait")]
    pub shutdown_wait_seconds: f64,
}

fn default_stop_timeout() -> f64 {
    10.0
}

fn default_send_timeout() -> f64 {
    10.0
}

fn default_shutdown_wait() -> f64 {
    20.0
}

impl Default for TraverserConfig {
    fn default() -> Self {
        Self {
            stop_timeout_seconds: default_stop_timeout(),
            send_timeout_seconds: default_send_timeout(),
            shutdown_wait_seconds: default_shutdown_wait(),
        }
    }
}

impl TraverserConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON, filling in defaults.
    pub fn from_json(json: &str) -> Result<Self, JobflowError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| JobflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects negative or non-finite bounds.
    pub fn validate(&self) -> Result<(), JobflowError> {
        for (name, value) in [
            ("stop_timeout_seconds", self.stop_timeout_seconds),
            ("send_timeout_seconds", self.send_timeout_seconds),
            ("shutdown_wait_seconds", self.shutdown_wait_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(JobflowError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Sets the stop timeout.
    #[must_use]
    pub fn with_stop_timeout(mut self, seconds: f64) -> Self {
        self.stop_timeout_seconds = seconds;
        self
    }

    /// Sets the send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, seconds: f64) -> Self {
        self.send_timeout_seconds = seconds;
        self
    }

    /// Sets the shutdown wait.
    #[must_use]
    pub fn with_shutdown_wait(mut self, seconds: f64) -> Self {
        self.shutdown_wait_seconds = seconds;
        self
    }

    /// Gets the stop timeout as Duration.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        seconds(self.stop_timeout_seconds)
    }

    /// Gets the send timeout as Duration.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        seconds(self.send_timeout_seconds)
    }

    /// Gets the shutdown wait as Duration.
    #[must_use]
    pub fn shutdown_wait(&self) -> Duration {
        seconds(self.shutdown_wait_seconds)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Logging configuration for [`crate::observability::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Sets the default filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}
