//! warmpool-provider: the backend provider boundary.
//!
//! The controller only talks to a backend through the [`Provider`] trait:
//! create, list, list revisions, update, delete, and grant public access
//! for a service instance. Results come back as the provider-agnostic
//! observation records from `warmpool-core`.
//!
//! Two implementations ship here:
//!
//! - [`CloudRunProvider`]: the Cloud Run Admin API v2 over HTTPS. Hides
//!   pagination and long-running operation polling.
//! - [`MemoryProvider`]: a thread-safe in-memory backend with
//!   deterministic listing order and failure injection, used by tests and
//!   by `warmpoold` in dry-run setups.
//!
//! No retry policy lives here; retries belong to whoever schedules the
//! reconcile cycles.

pub mod cloud_run;
pub mod error;
pub mod memory;
pub mod provider;

pub use cloud_run::{CloudRunConfig, CloudRunProvider, TokenSource};
pub use error::{ProviderError, ProviderErrorKind, ProviderOperation, ProviderResult};
pub use memory::MemoryProvider;
pub use provider::{Provider, SharedProvider};
