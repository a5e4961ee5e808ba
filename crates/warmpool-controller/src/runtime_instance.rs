//! One registered runtime and its pool snapshot.
//!
//! The snapshot is rebuilt from the global observation lists on every
//! refresh and swapped in as a single `Arc`, so a reader always sees the
//! free and assigned pools of the same refresh. The lock guards only the
//! pointer swap and the pointer read; it is never held across I/O.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, warn};

use warmpool_core::labels::{self, assignment_key, belongs_to};
use warmpool_core::{
    RevisionObservation, RuntimeDefinition, ServiceInstance, ServiceObservation, TrafficPolicy,
};

use crate::operation::{Operation, fresh_service_name};

/// Which pool an instance sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Free,
    Assigned,
}

/// Free and assigned instances observed by one refresh.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    /// Refresh counter; 0 until the first refresh.
    pub generation: u64,
    /// Sorted by service name.
    pub free: Vec<ServiceInstance>,
    /// Keyed by assignment key.
    pub assigned: BTreeMap<String, ServiceInstance>,
    /// Assigned instances whose key is already held by a service with a
    /// lower name. Still assigned, but never routed.
    pub conflicts: Vec<(String, ServiceInstance)>,
}

impl PoolSnapshot {
    /// Build a snapshot from the unfiltered observation lists.
    pub fn partition(
        runtime: &str,
        services: &[ServiceObservation],
        revisions: &[RevisionObservation],
        policy: TrafficPolicy,
    ) -> Self {
        let mut by_service: BTreeMap<&str, Vec<&RevisionObservation>> = BTreeMap::new();
        for revision in revisions.iter().filter(|r| belongs_to(&r.labels, runtime)) {
            by_service
                .entry(revision.service.as_str())
                .or_default()
                .push(revision);
        }

        let mut owned: Vec<&ServiceObservation> = services
            .iter()
            .filter(|s| belongs_to(&s.labels, runtime))
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));

        let mut free = Vec::new();
        let mut assigned: BTreeMap<String, ServiceInstance> = BTreeMap::new();
        let mut conflicts = Vec::new();
        for service in owned {
            let group = by_service
                .get(service.name.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let instance = ServiceInstance::build(service, group, policy);
            let Some(key) = assignment_key(&service.labels) else {
                free.push(instance);
                continue;
            };
            match assigned.entry(key.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(instance);
                }
                Entry::Occupied(held) => {
                    warn!(
                        %runtime,
                        key,
                        kept = %held.get().name,
                        service = %instance.name,
                        "assignment key held by two services"
                    );
                    conflicts.push((key.to_string(), instance));
                }
            }
        }

        Self {
            generation: 0,
            free,
            assigned,
            conflicts,
        }
    }
}

/// Pool sizes for one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSummary {
    pub name: String,
    pub desired: u32,
    pub free: usize,
    /// Includes conflicting assignments.
    pub assigned: usize,
    pub conflicts: usize,
    pub public: bool,
    pub revision: String,
}

/// A registered runtime: its definition and latest pool snapshot.
pub struct RuntimeInstance {
    name: String,
    policy: TrafficPolicy,
    definition: RwLock<Arc<RuntimeDefinition>>,
    snapshot: RwLock<Arc<PoolSnapshot>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl RuntimeInstance {
    /// The definition is assumed validated.
    pub fn new(definition: RuntimeDefinition, policy: TrafficPolicy) -> Self {
        Self {
            name: definition.name.clone(),
            policy,
            definition: RwLock::new(Arc::new(definition)),
            snapshot: RwLock::new(Arc::new(PoolSnapshot::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> Arc<RuntimeDefinition> {
        Arc::clone(&read(&self.definition))
    }

    /// Replace the definition. The snapshot is kept.
    pub fn set_definition(&self, definition: RuntimeDefinition) {
        *write(&self.definition) = Arc::new(definition);
    }

    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        Arc::clone(&read(&self.snapshot))
    }

    /// Partition the global observations and swap in the result.
    pub fn refresh(&self, services: &[ServiceObservation], revisions: &[RevisionObservation]) {
        let mut next = PoolSnapshot::partition(&self.name, services, revisions, self.policy);

        let mut slot = write(&self.snapshot);
        next.generation = slot.generation + 1;
        debug!(
            runtime = %self.name,
            generation = next.generation,
            free = next.free.len(),
            assigned = next.assigned.len(),
            "pool snapshot refreshed"
        );
        *slot = Arc::new(next);
    }

    /// Operations that bring the free pool to its desired size.
    ///
    /// Surplus victims are the last names of the sorted free pool, so the
    /// same snapshot always yields the same deletions.
    pub fn converge(&self) -> Vec<Operation> {
        let definition = self.definition();
        let snapshot = self.snapshot();
        let desired = definition.free_size as usize;
        let observed = snapshot.free.len();

        if observed < desired {
            (0..desired - observed)
                .map(|_| Operation::CreateFreeService {
                    runtime: self.name.clone(),
                    service_name: fresh_service_name(&self.name),
                    public: definition.public,
                    labels: definition.labels.clone(),
                    revision: definition.revision.clone(),
                })
                .collect()
        } else {
            snapshot.free[desired..]
                .iter()
                .map(|victim| Operation::DeleteFreeService {
                    runtime: self.name.clone(),
                    service_name: victim.name.clone(),
                })
                .collect()
        }
    }

    /// Free instances whose newest revision is not the definition's
    /// current revision template.
    pub fn stale_free_instances(&self) -> Vec<String> {
        let definition = self.definition();
        self.snapshot()
            .free
            .iter()
            .filter(|instance| {
                instance
                    .newest_revision()
                    .is_none_or(|rev| instance.revision_suffix(rev) != definition.revision.name)
            })
            .map(|instance| instance.name.clone())
            .collect()
    }

    /// Assignment key → uri for assigned instances that are ready.
    pub fn routes(&self) -> BTreeMap<String, String> {
        self.snapshot()
            .assigned
            .iter()
            .filter(|(_, instance)| instance.state.ready)
            .map(|(key, instance)| (key.clone(), instance.uri.clone()))
            .collect()
    }

    /// Find an instance by service name in either pool, or by assignment
    /// key. A key resolves to the service holding it, never a conflict.
    pub fn lookup(&self, id: &str) -> Option<(PoolKind, Option<String>, ServiceInstance)> {
        let snapshot = self.snapshot();
        if let Some(instance) = snapshot.free.iter().find(|i| i.name == id) {
            return Some((PoolKind::Free, None, instance.clone()));
        }
        snapshot
            .assigned
            .iter()
            .find(|(key, instance)| key.as_str() == id || instance.name == id)
            .or_else(|| {
                snapshot
                    .conflicts
                    .iter()
                    .map(|(key, instance)| (key, instance))
                    .find(|(_, instance)| instance.name == id)
            })
            .map(|(key, instance)| (PoolKind::Assigned, Some(key.clone()), instance.clone()))
    }

    pub fn summary(&self) -> RuntimeSummary {
        let definition = self.definition();
        let snapshot = self.snapshot();
        RuntimeSummary {
            name: self.name.clone(),
            desired: definition.free_size,
            free: snapshot.free.len(),
            assigned: snapshot.assigned.len() + snapshot.conflicts.len(),
            conflicts: snapshot.conflicts.len(),
            public: definition.public,
            revision: definition.revision.name.clone(),
        }
    }

    /// Human-readable pool listing, one line per entry.
    pub fn display(&self) -> Vec<String> {
        let definition = self.definition();
        let snapshot = self.snapshot();

        let mut lines = vec![format!(
            "{} [{}]:",
            self.name,
            labels::format_labels(&definition.labels)
        )];
        for instance in &snapshot.free {
            lines.push(format!("  > {}: {}", instance.name, instance.state));
            lines.push(format!("    uri: {}", instance.uri));
            for revision in &instance.revisions {
                lines.push(format!(
                    "    - {}[{}]: {}",
                    instance.revision_suffix(revision),
                    labels::format_labels(&revision.labels),
                    revision.state
                ));
            }
        }
        for (key, instance) in &snapshot.assigned {
            lines.push(format!("  @ {key} -> {}: {}", instance.name, instance.state));
        }
        for (key, instance) in &snapshot.conflicts {
            lines.push(format!(
                "  ! {key} -> {}: {} (key already held)",
                instance.name, instance.state
            ));
        }
        lines
    }
}
