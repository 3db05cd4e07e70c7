//! The request a chain is built for.

use crate::errors::StepError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A name/value tag attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: String,
}

/// The originating request of a chain: its id, arguments and tags.
///
/// Steps read their arguments from here in `Step::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique id of this request.
    pub request_id: Uuid,
    /// Request arguments.
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    /// Request tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Creates a request with a generated id and no arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4())
    }

    /// Creates a request with a specific id.
    #[must_use]
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            args: HashMap::new(),
            tags: Vec::new(),
        }
    }

    /// Sets an argument.
    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Returns an argument, if present.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.args.get(name)
    }

    /// Returns a required integer argument.
    ///
    /// Whole-valued floats are accepted, since JSON clients often send them.
    #[allow(clippy::cast_possible_truncation)]
    pub fn arg_i64(&self, name: &str) -> Result<i64, StepError> {
        let value = self
            .arg(name)
            .ok_or_else(|| StepError::MissingArgument(name.to_string()))?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 => Ok(f as i64),
            _ => Err(StepError::invalid_argument(
                name,
                format!("expected an integer, got {value}"),
            )),
        }
    }

    /// Returns an optional integer argument, or `default` if absent.
    pub fn arg_i64_or(&self, name: &str, default: i64) -> Result<i64, StepError> {
        if self.arg(name).is_none() {
            return Ok(default);
        }
        self.arg_i64(name)
    }

    /// Returns a required numeric argument.
    pub fn arg_f64(&self, name: &str) -> Result<f64, StepError> {
        let value = self
            .arg(name)
            .ok_or_else(|| StepError::MissingArgument(name.to_string()))?;
        value.as_f64().ok_or_else(|| {
            StepError::invalid_argument(name, format!("expected a number, got {value}"))
        })
    }

    /// Returns a required string argument.
    pub fn arg_str(&self, name: &str) -> Result<&str, StepError> {
        let value = self
            .arg(name)
            .ok_or_else(|| StepError::MissingArgument(name.to_string()))?;
        value.as_str().ok_or_else(|| {
            StepError::invalid_argument(name, format!("expected a string, got {value}"))
        })
    }

    /// Returns the value of the first tag with this name.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}
