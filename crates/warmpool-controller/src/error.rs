//! Controller error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use warmpool_core::CoreError;
use warmpool_provider::ProviderError;

/// The fan-out cycle a [`ControllerError::Cycle`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cycle {
    Refresh,
    Converge,
    RollOut,
    DeleteAll,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cycle::Refresh => "refresh",
            Cycle::Converge => "converge",
            Cycle::RollOut => "roll-out",
            Cycle::DeleteAll => "delete-all",
        })
    }
}

/// Errors returned by the registry and its cycles.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("runtime already registered: {0}")]
    DuplicateRuntime(String),

    #[error("runtime not found: {0}")]
    RuntimeNotFound(String),

    #[error("instance `{id}` not found in runtime {runtime}")]
    InstanceNotFound { runtime: String, id: String },

    #[error("invalid runtime definition: {0}")]
    InvalidDefinition(#[from] CoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("task failed: {0}")]
    Task(String),

    /// One or more concurrent tasks of a cycle failed. Carries the first
    /// failure observed.
    #[error("{cycle} cycle failed ({failed} of {total} tasks): {first}")]
    Cycle {
        cycle: Cycle,
        failed: usize,
        total: usize,
        first: Box<ControllerError>,
    },
}

impl ControllerError {
    /// The underlying error, looking through a cycle wrapper.
    pub fn root(&self) -> &ControllerError {
        match self {
            ControllerError::Cycle { first, .. } => first.root(),
            other => other,
        }
    }

    /// The provider error at the root, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self.root() {
            ControllerError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use warmpool_provider::{ProviderErrorKind, ProviderOperation};

    #[test]
    fn cycle_error_names_counts_and_first_failure() {
        let err = ControllerError::Cycle {
            cycle: Cycle::Converge,
            failed: 1,
            total: 3,
            first: Box::new(ControllerError::Provider(ProviderError::new(
                ProviderOperation::Create,
                "web-1",
                ProviderErrorKind::NotFound,
            ))),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("converge cycle failed (1 of 3 tasks)"));
        assert!(msg.contains("create `web-1` failed"));
        assert_eq!(err.provider_error().map(|e| e.target.as_str()), Some("web-1"));
    }

    #[test]
    fn root_of_plain_error_is_itself() {
        let err = ControllerError::RuntimeNotFound("web".to_string());
        assert!(matches!(err.root(), ControllerError::RuntimeNotFound(_)));
        assert!(err.provider_error().is_none());
    }
}
