//! warmpool-core: shared types for the warmpool controller.
//!
//! Holds the desired-state record for a runtime ([`RuntimeDefinition`]),
//! the provider-agnostic observation records returned by a backend
//! ([`ServiceObservation`], [`RevisionObservation`]), the pool state types
//! built from those observations ([`ServiceInstance`], [`RevisionInstance`]),
//! and the `warmpool.toml` configuration parser.
//!
//! # Ownership labels
//!
//! Labels are the only ownership mechanism. Every service and revision that
//! belongs to a runtime carries [`labels::RUNTIME_LABEL`] set to the runtime
//! name; a service handed out to a caller additionally carries
//! [`labels::ASSIGNMENT_LABEL`] keyed by the assignment identifier.

pub mod config;
pub mod error;
pub mod instance;
pub mod labels;
pub mod observation;
pub mod types;

pub use config::WarmpoolConfig;
pub use error::{CoreError, CoreResult};
pub use instance::*;
pub use observation::*;
pub use types::*;
