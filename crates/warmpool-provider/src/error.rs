//! Provider error types.

use std::fmt;

use thiserror::Error;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// The provider call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOperation {
    Create,
    List,
    ListRevisions,
    Update,
    Delete,
    GrantPublicAccess,
}

impl fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderOperation::Create => "create",
            ProviderOperation::List => "list",
            ProviderOperation::ListRevisions => "list_revisions",
            ProviderOperation::Update => "update",
            ProviderOperation::Delete => "delete",
            ProviderOperation::GrantPublicAccess => "grant_public_access",
        })
    }
}

/// What went wrong talking to the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderErrorKind {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("long-running operation failed: {0}")]
    OperationFailed(String),

    #[error("timed out waiting for long-running operation")]
    Timeout,

    #[error("injected failure: {0}")]
    Injected(String),
}

/// A failed provider call, attributable to one `(operation, target)` pair.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} `{target}` failed: {kind}")]
pub struct ProviderError {
    pub operation: ProviderOperation,
    /// Service name, or the project/location parent for list calls.
    pub target: String,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(operation: ProviderOperation, target: &str, kind: ProviderErrorKind) -> Self {
        Self {
            operation,
            target: target.to_string(),
            kind,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}
