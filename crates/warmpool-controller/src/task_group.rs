//! Structured fan-out for one cycle.
//!
//! A [`TaskGroup`] spawns one task per unit of work and joins them all.
//! The first failure flips a shared cancellation flag. Work already in
//! flight runs to completion; when a concurrency cap is set, tasks still
//! waiting for a permit see the flag and skip their work.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{ControllerError, ControllerResult, Cycle};

enum Outcome {
    Done,
    Skipped,
    Failed(ControllerError),
}

/// Counts from a successfully joined group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub completed: usize,
    pub skipped: usize,
}

pub struct TaskGroup {
    cycle: Cycle,
    tasks: JoinSet<Outcome>,
    cancel: Arc<watch::Sender<bool>>,
    limit: Option<Arc<Semaphore>>,
}

impl TaskGroup {
    /// `max_concurrency` of `None` (or zero) runs every task at once.
    pub fn new(cycle: Cycle, max_concurrency: Option<usize>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cycle,
            tasks: JoinSet::new(),
            cancel: Arc::new(cancel),
            limit: max_concurrency
                .filter(|n| *n > 0)
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether a task in this group has failed.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn spawn<F>(&mut self, label: String, work: F)
    where
        F: Future<Output = ControllerResult<()>> + Send + 'static,
    {
        let cancel = Arc::clone(&self.cancel);
        let limit = self.limit.clone();

        self.tasks.spawn(async move {
            // Held until the task finishes, including the cancel signal
            // below, so a waiter never starts before it sees the failure.
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => {
                        if *cancel.borrow() {
                            debug!(task = %label, "skipped after an earlier failure");
                            return Outcome::Skipped;
                        }
                        Some(permit)
                    }
                    Err(_) => return Outcome::Skipped,
                },
                None => None,
            };

            match work.await {
                Ok(()) => Outcome::Done,
                Err(e) => {
                    warn!(task = %label, error = %e, "task failed");
                    cancel.send_replace(true);
                    Outcome::Failed(e)
                }
            }
        });
    }

    /// Wait for every task. Fails with [`ControllerError::Cycle`] carrying
    /// the first failure if any task failed or panicked.
    pub async fn join(mut self) -> ControllerResult<GroupStats> {
        let total = self.tasks.len();
        let mut stats = GroupStats::default();
        let mut failed = 0;
        let mut first: Option<ControllerError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Outcome::Done) => stats.completed += 1,
                Ok(Outcome::Skipped) => stats.skipped += 1,
                Ok(Outcome::Failed(e)) => {
                    failed += 1;
                    first.get_or_insert(e);
                }
                Err(join_error) => {
                    failed += 1;
                    self.cancel.send_replace(true);
                    first.get_or_insert(ControllerError::Task(join_error.to_string()));
                }
            }
        }

        match first {
            Some(first) => Err(ControllerError::Cycle {
                cycle: self.cycle,
                failed,
                total,
                first: Box::new(first),
            }),
            None => Ok(stats),
        }
    }
}
