//! warmpool-controller: keeps a warm pool of idle instances per runtime.
//!
//! Each registered runtime declares how many free (unassigned) instances
//! it wants. A reconciliation cycle observes the provider, partitions
//! what it sees into per-runtime free and assigned pools, and issues the
//! create/delete operations that bring every free pool to its size.
//!
//! # Architecture
//!
//! ```text
//! State
//!   ├── SharedProvider (create / list / update / delete / grant access)
//!   └── Per-runtime RuntimeInstance
//!       ├── RuntimeDefinition (desired free size + revision template)
//!       └── PoolSnapshot (free: sorted Vec, assigned: key → instance)
//!
//! refresh:  list + list_all_revisions ──► partition per runtime ──► swap snapshot
//! converge: diff per runtime ──► Vec<Operation> ──► TaskGroup ──► provider
//! ```

pub mod error;
pub mod operation;
pub mod runtime_instance;
pub mod state;
pub mod task_group;

pub use error::{ControllerError, ControllerResult, Cycle};
pub use operation::{Operation, fresh_service_name};
pub use runtime_instance::{PoolKind, PoolSnapshot, RuntimeInstance, RuntimeSummary};
pub use state::{ConvergeReport, InstanceView, State};
pub use task_group::{GroupStats, TaskGroup};
