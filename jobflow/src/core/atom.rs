//! Step identity and step return values.

use super::State;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a step instance within a chain.
///
/// Equality is structural over all three fields. `kind` is a namespaced
/// name derived from the step's concrete type, e.g. `builtin.SleepStep`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId {
    /// Namespaced step kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Id local to the chain.
    pub id: String,
    /// Digest of the expansion that produced this step, if any.
    #[serde(default)]
    pub expansion_digest: String,
}

impl AtomId {
    /// Creates a new atom id.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
        expansion_digest: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            expansion_digest: expansion_digest.into(),
        }
    }

    /// Creates an atom id whose kind is `namespace.TypeName` for `T`.
    #[must_use]
    pub fn for_type<T: ?Sized>(
        namespace: &str,
        id: impl Into<String>,
        expansion_digest: impl Into<String>,
    ) -> Self {
        Self::new(kind_name::<T>(namespace), id, expansion_digest)
    }

    /// Returns true if every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.id.is_empty() && self.expansion_digest.is_empty()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)?;
        if !self.expansion_digest.is_empty() {
            write!(f, "@{}", self.expansion_digest)?;
        }
        Ok(())
    }
}

/// Builds `namespace.TypeName` from the last path segment of `T`'s type name.
fn kind_name<T: ?Sized>(namespace: &str) -> String {
    let full = std::any::type_name::<T>();
    // Strip generic arguments before taking the last path segment.
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    if namespace.is_empty() {
        short.to_string()
    } else {
        format!("{namespace}.{short}")
    }
}

/// What a step reports after one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReturn {
    /// The state the run ended in.
    pub state: State,
    /// Unix-style exit code.
    pub exit_code: i64,
    /// Error text, if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReturn {
    /// Creates a return with the given state and exit code 0.
    #[must_use]
    pub fn new(state: State) -> Self {
        Self {
            state,
            exit_code: 0,
            error: None,
        }
    }

    /// A successful return.
    #[must_use]
    pub fn success() -> Self {
        Self::new(State::Success)
    }

    /// A failed return with exit code 1.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            state: State::Fail,
            exit_code: 1,
            error: Some(error.into()),
        }
    }

    /// A return for a step that faulted while running.
    #[must_use]
    pub fn exception(error: impl Into<String>) -> Self {
        Self {
            state: State::Exception,
            exit_code: 1,
            error: Some(error.into()),
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }
}

impl Default for StepReturn {
    fn default() -> Self {
        Self::new(State::Unknown)
    }
}
