//! The runtime registry and its reconciliation cycles.
//!
//! `State` owns the set of registered runtimes and the shared provider.
//! Callers drive it with [`State::refresh`] (observe) followed by
//! [`State::converge`] (decide and act); neither schedules itself.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use warmpool_core::labels::RUNTIME_LABEL;
use warmpool_core::{RuntimeDefinition, ServiceState, TrafficPolicy};
use warmpool_provider::SharedProvider;

use crate::error::{ControllerError, ControllerResult, Cycle};
use crate::runtime_instance::{PoolKind, RuntimeInstance, RuntimeSummary};
use crate::task_group::TaskGroup;

/// Outcome of a successful converge cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvergeReport {
    pub created: usize,
    pub deleted: usize,
}

impl ConvergeReport {
    pub fn is_idle(&self) -> bool {
        self.created == 0 && self.deleted == 0
    }
}

/// Observed state of one instance, as returned by [`State::lookup`].
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub runtime: String,
    /// The id the caller looked up.
    pub id: String,
    pub name: String,
    pub uri: String,
    pub pool: PoolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<String>,
    pub status: String,
    pub state: ServiceState,
    pub revisions: Vec<String>,
}

pub struct State {
    provider: SharedProvider,
    runtimes: RwLock<BTreeMap<String, Arc<RuntimeInstance>>>,
    max_concurrency: Option<usize>,
    traffic_policy: TrafficPolicy,
}

impl State {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            runtimes: RwLock::new(BTreeMap::new()),
            max_concurrency: None,
            traffic_policy: TrafficPolicy::default(),
        }
    }

    /// Cap the number of provider operations in flight per cycle.
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_traffic_policy(mut self, policy: TrafficPolicy) -> Self {
        self.traffic_policy = policy;
        self
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a runtime. Its pool is empty until the next refresh.
    pub fn add_runtime(&self, definition: RuntimeDefinition) -> ControllerResult<()> {
        let definition = definition.with_identity_label();
        definition.validate()?;

        let mut runtimes = self.runtimes.write().unwrap_or_else(PoisonError::into_inner);
        if runtimes.contains_key(&definition.name) {
            return Err(ControllerError::DuplicateRuntime(definition.name));
        }

        info!(
            runtime = %definition.name,
            free_size = definition.free_size,
            public = definition.public,
            revision = %definition.revision.name,
            "runtime registered"
        );
        runtimes.insert(
            definition.name.clone(),
            Arc::new(RuntimeInstance::new(definition, self.traffic_policy)),
        );
        Ok(())
    }

    /// Replace the definition of a registered runtime. The next converge
    /// sizes the pool against it.
    pub fn update_runtime(&self, definition: RuntimeDefinition) -> ControllerResult<()> {
        let definition = definition.with_identity_label();
        definition.validate()?;

        let runtime = self.runtime(&definition.name)?;
        info!(
            runtime = %definition.name,
            free_size = definition.free_size,
            revision = %definition.revision.name,
            "runtime definition updated"
        );
        runtime.set_definition(definition);
        Ok(())
    }

    /// Deregister a runtime. Its instances are left at the provider.
    pub fn remove_runtime(&self, name: &str) -> ControllerResult<()> {
        let removed = self
            .runtimes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(_) => {
                info!(runtime = %name, "runtime removed");
                Ok(())
            }
            None => Err(ControllerError::RuntimeNotFound(name.to_string())),
        }
    }

    pub fn runtime(&self, name: &str) -> ControllerResult<Arc<RuntimeInstance>> {
        self.runtimes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::RuntimeNotFound(name.to_string()))
    }

    pub fn runtime_names(&self) -> Vec<String> {
        self.runtimes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn all_runtimes(&self) -> Vec<Arc<RuntimeInstance>> {
        self.runtimes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // ── Cycles ──────────────────────────────────────────────────────

    /// Fetch services and revisions, then rebuild every runtime's pool
    /// snapshot. Returns the number of runtimes refreshed.
    ///
    /// On failure the previous snapshots stay in place.
    pub async fn refresh(&self) -> ControllerResult<usize> {
        let (services, revisions) =
            tokio::join!(self.provider.list(), self.provider.list_all_revisions());

        let failed = usize::from(services.is_err()) + usize::from(revisions.is_err());
        let (services, revisions) = match (services, revisions) {
            (Ok(services), Ok(revisions)) => (Arc::new(services), Arc::new(revisions)),
            (Err(e), _) | (_, Err(e)) => {
                return Err(ControllerError::Cycle {
                    cycle: Cycle::Refresh,
                    failed,
                    total: 2,
                    first: Box::new(e.into()),
                });
            }
        };
        debug!(
            services = services.len(),
            revisions = revisions.len(),
            "fetched observations"
        );

        let runtimes = self.all_runtimes();
        let mut group = TaskGroup::new(Cycle::Refresh, None);
        for runtime in runtimes {
            let services = Arc::clone(&services);
            let revisions = Arc::clone(&revisions);
            group.spawn(format!("refresh {}", runtime.name()), async move {
                runtime.refresh(&services, &revisions);
                Ok(())
            });
        }

        let stats = group.join().await?;
        info!(runtimes = stats.completed, "refresh cycle complete");
        Ok(stats.completed)
    }

    /// Compute operations for every runtime and execute them concurrently.
    pub async fn converge(&self) -> ControllerResult<ConvergeReport> {
        let operations: Vec<_> = self
            .all_runtimes()
            .iter()
            .flat_map(|runtime| runtime.converge())
            .collect();

        if operations.is_empty() {
            debug!("converge cycle idle");
            return Ok(ConvergeReport::default());
        }

        let report = ConvergeReport {
            created: operations.iter().filter(|op| op.is_create()).count(),
            deleted: operations.iter().filter(|op| !op.is_create()).count(),
        };
        info!(
            created = report.created,
            deleted = report.deleted,
            "converge cycle starting"
        );

        let mut group = TaskGroup::new(Cycle::Converge, self.max_concurrency);
        for operation in operations {
            let provider = Arc::clone(&self.provider);
            group.spawn(operation.to_string(), async move {
                operation.execute(provider.as_ref()).await?;
                Ok(())
            });
        }
        group.join().await?;

        info!(
            created = report.created,
            deleted = report.deleted,
            "converge cycle complete"
        );
        Ok(report)
    }

    /// One refresh followed by one converge.
    pub async fn reconcile(&self) -> ControllerResult<ConvergeReport> {
        self.refresh().await?;
        self.converge().await
    }

    /// Attach the current revision template to every free instance of
    /// `name` still running an older one. Returns the number updated.
    pub async fn roll_out(&self, name: &str) -> ControllerResult<usize> {
        let runtime = self.runtime(name)?;
        let template = runtime.definition().revision.clone();
        let targets = runtime.stale_free_instances();
        if targets.is_empty() {
            debug!(runtime = %name, "roll-out has nothing to update");
            return Ok(0);
        }

        info!(
            runtime = %name,
            count = targets.len(),
            revision = %template.name,
            "rolling out revision"
        );
        let mut group = TaskGroup::new(Cycle::RollOut, self.max_concurrency);
        for service in targets {
            let provider = Arc::clone(&self.provider);
            let template = template.clone();
            group.spawn(format!("update {name}/{service}"), async move {
                provider.update(&service, &template).await?;
                Ok(())
            });
        }
        Ok(group.join().await?.completed)
    }

    /// Delete every provider service owned by a registered runtime,
    /// assigned or not. Returns the number deleted.
    pub async fn delete_all(&self) -> ControllerResult<usize> {
        let names = self.runtime_names();
        let services = self.provider.list().await?;
        let owned: Vec<_> = services
            .into_iter()
            .filter(|service| {
                service
                    .labels
                    .get(RUNTIME_LABEL)
                    .is_some_and(|runtime| names.contains(runtime))
            })
            .collect();

        info!(count = owned.len(), "deleting all owned services");
        let mut group = TaskGroup::new(Cycle::DeleteAll, self.max_concurrency);
        for service in owned {
            let provider = Arc::clone(&self.provider);
            group.spawn(format!("delete {}", service.name), async move {
                provider.delete(&service.name).await?;
                info!(service = %service.name, "deleted");
                Ok(())
            });
        }
        Ok(group.join().await?.completed)
    }

    // ── Read side ───────────────────────────────────────────────────

    /// Assignment key → uri for `name`'s ready assigned instances.
    pub fn routes(&self, name: &str) -> ControllerResult<BTreeMap<String, String>> {
        Ok(self.runtime(name)?.routes())
    }

    pub fn lookup(&self, runtime: &str, id: &str) -> ControllerResult<InstanceView> {
        let instance = self.runtime(runtime)?;
        let (pool, assignment, found) =
            instance
                .lookup(id)
                .ok_or_else(|| ControllerError::InstanceNotFound {
                    runtime: runtime.to_string(),
                    id: id.to_string(),
                })?;

        Ok(InstanceView {
            runtime: runtime.to_string(),
            id: id.to_string(),
            status: found.state.to_string(),
            revisions: found
                .revisions
                .iter()
                .map(|rev| format!("{}: {}", found.revision_suffix(rev), rev.state))
                .collect(),
            name: found.name,
            uri: found.uri,
            pool,
            assignment,
            state: found.state,
        })
    }

    /// Per-runtime pool sizes, sorted by name.
    pub fn summaries(&self) -> Vec<RuntimeSummary> {
        self.all_runtimes().iter().map(|r| r.summary()).collect()
    }

    pub fn display(&self, name: &str) -> ControllerResult<Vec<String>> {
        Ok(self.runtime(name)?.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warmpool_core::{Container, RevisionTemplate};
    use warmpool_provider::MemoryProvider;

    fn definition(name: &str, free_size: u32) -> RuntimeDefinition {
        RuntimeDefinition::new(
            name,
            false,
            free_size,
            BTreeMap::new(),
            RevisionTemplate {
                name: "v1".to_string(),
                min_scale: 0,
                max_scale: 1,
                max_concurrency: 80,
                timeout_secs: 60,
                containers: vec![Container {
                    name: "app".to_string(),
                    image: "img".to_string(),
                    command: None,
                    args: vec![],
                }],
            },
        )
    }

    fn state() -> State {
        State::new(Arc::new(MemoryProvider::new()))
    }

    #[test]
    fn add_runtime_rejects_invalid_definition() {
        let state = state();
        let mut bad = definition("web", 1);
        bad.revision.containers.clear();
        let err = state.add_runtime(bad).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidDefinition(_)));
        assert!(state.runtime_names().is_empty());
    }

    #[test]
    fn add_runtime_inserts_missing_identity_label() {
        let state = state();
        let mut def = definition("web", 1);
        def.labels.clear();
        state.add_runtime(def).unwrap();
        let stored = state.runtime("web").unwrap().definition();
        assert_eq!(stored.labels.get(RUNTIME_LABEL).map(String::as_str), Some("web"));
    }

    #[test]
    fn update_requires_registration() {
        let state = state();
        let err = state.update_runtime(definition("web", 1)).unwrap_err();
        assert!(matches!(err, ControllerError::RuntimeNotFound(_)));

        state.add_runtime(definition("web", 1)).unwrap();
        state.update_runtime(definition("web", 4)).unwrap();
        assert_eq!(state.runtime("web").unwrap().definition().free_size, 4);
    }

    #[test]
    fn remove_runtime() {
        let state = state();
        state.add_runtime(definition("web", 1)).unwrap();
        state.remove_runtime("web").unwrap();
        assert!(matches!(
            state.remove_runtime("web"),
            Err(ControllerError::RuntimeNotFound(_))
        ));
    }

    #[test]
    fn summaries_are_sorted() {
        let state = state();
        state.add_runtime(definition("worker", 1)).unwrap();
        state.add_runtime(definition("api", 2)).unwrap();
        let names: Vec<_> = state.summaries().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["api", "worker"]);
    }

    #[tokio::test]
    async fn converge_with_no_runtimes_is_idle() {
        let state = state();
        assert_eq!(state.refresh().await.unwrap(), 0);
        assert!(state.converge().await.unwrap().is_idle());
    }

    #[test]
    fn lookup_unknown_instance() {
        let state = state();
        state.add_runtime(definition("web", 1)).unwrap();
        assert!(matches!(
            state.lookup("web", "web-x"),
            Err(ControllerError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            state.lookup("api", "web-x"),
            Err(ControllerError::RuntimeNotFound(_))
        ));
    }
}
