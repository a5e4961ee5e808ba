//! The provider trait consumed by the controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use warmpool_core::{RevisionObservation, RevisionTemplate, ServiceObservation};

use crate::error::ProviderResult;

/// A provider shared read-only by every concurrent task of a cycle.
pub type SharedProvider = Arc<dyn Provider>;

/// Remote compute backend that provisions service instances.
///
/// Implementations must be safe to call concurrently from many tasks,
/// including concurrent `create` calls for different names.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a service named `name` running `revision`, labelled with
    /// `labels` (on both the service and its first revision).
    async fn create(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        revision: &RevisionTemplate,
    ) -> ProviderResult<ServiceObservation>;

    /// Every service visible to this controller, not filtered by runtime.
    async fn list(&self) -> ProviderResult<Vec<ServiceObservation>>;

    /// Revisions of one service, newest first.
    async fn list_revisions(&self, service: &str) -> ProviderResult<Vec<RevisionObservation>>;

    /// Every revision of every service in one bulk fetch, grouped by
    /// service and newest first within a service.
    async fn list_all_revisions(&self) -> ProviderResult<Vec<RevisionObservation>>;

    /// Attach a new revision built from `revision` to an existing service.
    async fn update(&self, name: &str, revision: &RevisionTemplate) -> ProviderResult<()>;

    async fn delete(&self, name: &str) -> ProviderResult<()>;

    /// Let unauthenticated callers invoke the service.
    async fn grant_public_access(&self, name: &str) -> ProviderResult<()>;
}
