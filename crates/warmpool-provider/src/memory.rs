//! In-memory provider.
//!
//! Services are kept in name order and revisions newest first, so list
//! calls are deterministic. Failures can be injected per operation and
//! optionally per target, either once or on every matching call.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use warmpool_core::labels::ASSIGNMENT_LABEL;
use warmpool_core::{
    RevisionObservation, RevisionTemplate, ServiceObservation, TrafficTarget, TrafficTargetStatus,
};

use crate::error::{ProviderError, ProviderErrorKind, ProviderOperation, ProviderResult};
use crate::provider::Provider;

/// Target recorded for list calls, which have no single service.
const LIST_TARGET: &str = "*";

/// Calls kept by default; older entries are dropped first.
pub const DEFAULT_CALL_LOG: usize = 1024;

struct StoredService {
    service: ServiceObservation,
    /// Newest first.
    revisions: Vec<RevisionObservation>,
    public: bool,
}

struct FailureRule {
    operation: ProviderOperation,
    target: Option<String>,
    sticky: bool,
}

#[derive(Default)]
struct Inner {
    services: BTreeMap<String, StoredService>,
    /// Revisions whose owning service is not stored here.
    orphan_revisions: Vec<RevisionObservation>,
    failures: Vec<FailureRule>,
    calls: VecDeque<(ProviderOperation, String)>,
}

/// A thread-safe in-memory backend.
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
    call_log: usize,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self {
            inner: Mutex::default(),
            latency: None,
            call_log: DEFAULT_CALL_LOG,
        }
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it touches state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Keep at most `capacity` recorded calls. Zero disables recording.
    pub fn with_call_log(mut self, capacity: usize) -> Self {
        self.call_log = capacity;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding and inspection ──────────────────────────────────────

    /// Store an arbitrary service observation, replacing any with the
    /// same name.
    pub fn insert_service(&self, service: ServiceObservation) {
        let mut inner = self.lock();
        let revisions = inner
            .services
            .remove(&service.name)
            .map(|stored| stored.revisions)
            .unwrap_or_default();
        inner.services.insert(
            service.name.clone(),
            StoredService {
                service,
                revisions,
                public: false,
            },
        );
    }

    /// Store an arbitrary revision. It is listed before the service's
    /// existing revisions.
    pub fn insert_revision(&self, revision: RevisionObservation) {
        let mut inner = self.lock();
        match inner.services.get_mut(&revision.service) {
            Some(stored) => stored.revisions.insert(0, revision),
            None => inner.orphan_revisions.push(revision),
        }
    }

    /// Hand a service out under `key`, the way an external assignment
    /// flow would.
    pub fn assign(&self, name: &str, key: &str) -> bool {
        let mut inner = self.lock();
        match inner.services.get_mut(name) {
            Some(stored) => {
                stored
                    .service
                    .labels
                    .insert(ASSIGNMENT_LABEL.to_string(), key.to_string());
                true
            }
            None => false,
        }
    }

    /// Release an assigned service back to the free pool.
    pub fn release(&self, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.services.get_mut(name) {
            Some(stored) => stored.service.labels.remove(ASSIGNMENT_LABEL).is_some(),
            None => false,
        }
    }

    /// Fail the next call of `operation` (on `target`, if given).
    pub fn fail_once(&self, operation: ProviderOperation, target: Option<&str>) {
        self.lock().failures.push(FailureRule {
            operation,
            target: target.map(str::to_string),
            sticky: false,
        });
    }

    /// Fail every call of `operation` (on `target`, if given).
    pub fn fail_always(&self, operation: ProviderOperation, target: Option<&str>) {
        self.lock().failures.push(FailureRule {
            operation,
            target: target.map(str::to_string),
            sticky: true,
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// The most recent calls, oldest first.
    pub fn calls(&self) -> Vec<(ProviderOperation, String)> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Matching calls among those still in the log.
    pub fn count_calls(&self, operation: ProviderOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    pub fn get_service(&self, name: &str) -> Option<ServiceObservation> {
        self.lock().services.get(name).map(|s| s.service.clone())
    }

    pub fn is_public(&self, name: &str) -> bool {
        self.lock().services.get(name).is_some_and(|s| s.public)
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn begin(&self, operation: ProviderOperation, target: &str) -> ProviderResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        if self.call_log > 0 {
            if inner.calls.len() == self.call_log {
                inner.calls.pop_front();
            }
            inner.calls.push_back((operation, target.to_string()));
        }

        let matched = inner.failures.iter().position(|rule| {
            rule.operation == operation
                && rule.target.as_deref().is_none_or(|t| t == target)
        });
        if let Some(index) = matched {
            if !inner.failures[index].sticky {
                inner.failures.remove(index);
            }
            debug!(%operation, target, "memory provider injecting failure");
            return Err(ProviderError::new(
                operation,
                target,
                ProviderErrorKind::Injected(format!("{operation} {target}")),
            ));
        }
        Ok(())
    }
}

fn new_revision(
    service: &str,
    labels: &BTreeMap<String, String>,
    template: &RevisionTemplate,
    generation: i64,
) -> RevisionObservation {
    RevisionObservation {
        name: template.revision_name(service),
        service: service.to_string(),
        labels: labels.clone(),
        reconciling: false,
        deleted: false,
        observed_generation: generation,
        min_scale: template.min_scale,
        max_scale: template.max_scale,
        max_concurrency: template.max_concurrency,
        timeout_secs: template.timeout_secs,
        containers: template.containers.clone(),
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        revision: &RevisionTemplate,
    ) -> ProviderResult<ServiceObservation> {
        self.begin(ProviderOperation::Create, name).await?;

        let mut inner = self.lock();
        if inner.services.contains_key(name) {
            return Err(ProviderError::new(
                ProviderOperation::Create,
                name,
                ProviderErrorKind::AlreadyExists,
            ));
        }

        let first = new_revision(name, labels, revision, 1);
        let service = ServiceObservation {
            name: name.to_string(),
            labels: labels.clone(),
            reconciling: false,
            ready: true,
            uri: format!("https://{name}.memory.local"),
            observed_generation: 1,
            latest_ready_revision: Some(first.name.clone()),
            traffic: vec![TrafficTargetStatus {
                target: TrafficTarget::Latest,
                percent: 100,
            }],
        };

        inner.services.insert(
            name.to_string(),
            StoredService {
                service: service.clone(),
                revisions: vec![first],
                public: false,
            },
        );
        debug!(service = name, "memory provider created service");
        Ok(service)
    }

    async fn list(&self) -> ProviderResult<Vec<ServiceObservation>> {
        self.begin(ProviderOperation::List, LIST_TARGET).await?;
        Ok(self
            .lock()
            .services
            .values()
            .map(|stored| stored.service.clone())
            .collect())
    }

    async fn list_revisions(&self, service: &str) -> ProviderResult<Vec<RevisionObservation>> {
        self.begin(ProviderOperation::ListRevisions, service).await?;
        self.lock()
            .services
            .get(service)
            .map(|stored| stored.revisions.clone())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderOperation::ListRevisions,
                    service,
                    ProviderErrorKind::NotFound,
                )
            })
    }

    async fn list_all_revisions(&self) -> ProviderResult<Vec<RevisionObservation>> {
        self.begin(ProviderOperation::ListRevisions, LIST_TARGET).await?;
        let inner = self.lock();
        let mut revisions: Vec<RevisionObservation> = inner
            .services
            .values()
            .flat_map(|stored| stored.revisions.iter().cloned())
            .collect();
        revisions.extend(inner.orphan_revisions.iter().cloned());
        Ok(revisions)
    }

    async fn update(&self, name: &str, revision: &RevisionTemplate) -> ProviderResult<()> {
        self.begin(ProviderOperation::Update, name).await?;

        let mut inner = self.lock();
        let stored = inner.services.get_mut(name).ok_or_else(|| {
            ProviderError::new(ProviderOperation::Update, name, ProviderErrorKind::NotFound)
        })?;

        let revision_name = revision.revision_name(name);
        if stored.revisions.iter().any(|r| r.name == revision_name) {
            return Err(ProviderError::new(
                ProviderOperation::Update,
                name,
                ProviderErrorKind::AlreadyExists,
            ));
        }

        let generation = stored.service.observed_generation + 1;
        let labels = stored
            .service
            .labels
            .iter()
            .filter(|(key, _)| key.as_str() != ASSIGNMENT_LABEL)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        stored
            .revisions
            .insert(0, new_revision(name, &labels, revision, generation));
        stored.service.observed_generation = generation;
        stored.service.latest_ready_revision = Some(revision_name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> ProviderResult<()> {
        self.begin(ProviderOperation::Delete, name).await?;
        match self.lock().services.remove(name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::new(
                ProviderOperation::Delete,
                name,
                ProviderErrorKind::NotFound,
            )),
        }
    }

    async fn grant_public_access(&self, name: &str) -> ProviderResult<()> {
        self.begin(ProviderOperation::GrantPublicAccess, name).await?;
        match self.lock().services.get_mut(name) {
            Some(stored) => {
                stored.public = true;
                Ok(())
            }
            None => Err(ProviderError::new(
                ProviderOperation::GrantPublicAccess,
                name,
                ProviderErrorKind::NotFound,
            )),
        }
    }
}
