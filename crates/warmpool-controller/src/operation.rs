//! Provider-side actions emitted by convergence.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};
use uuid::Uuid;

use warmpool_core::RevisionTemplate;
use warmpool_provider::{Provider, ProviderResult};

/// Hex characters of a v4 UUID appended to the runtime name.
const NAME_SUFFIX_LEN: usize = 12;

/// One action against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a free instance and, for public runtimes, open it to
    /// unauthenticated callers.
    CreateFreeService {
        runtime: String,
        service_name: String,
        public: bool,
        labels: BTreeMap<String, String>,
        revision: RevisionTemplate,
    },
    /// Delete a surplus free instance.
    DeleteFreeService {
        runtime: String,
        service_name: String,
    },
}

impl Operation {
    pub fn runtime(&self) -> &str {
        match self {
            Operation::CreateFreeService { runtime, .. }
            | Operation::DeleteFreeService { runtime, .. } => runtime,
        }
    }

    pub fn service_name(&self) -> &str {
        match self {
            Operation::CreateFreeService { service_name, .. }
            | Operation::DeleteFreeService { service_name, .. } => service_name,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Operation::CreateFreeService { .. })
    }

    pub async fn execute(&self, provider: &dyn Provider) -> ProviderResult<()> {
        match self {
            Operation::CreateFreeService {
                runtime,
                service_name,
                public,
                labels,
                revision,
            } => {
                let created = provider.create(service_name, labels, revision).await?;
                if *public {
                    provider.grant_public_access(service_name).await?;
                }
                info!(
                    %runtime,
                    service = %service_name,
                    uri = %created.uri,
                    public,
                    "created free instance"
                );
            }
            Operation::DeleteFreeService {
                runtime,
                service_name,
            } => {
                provider.delete(service_name).await?;
                info!(%runtime, service = %service_name, "deleted free instance");
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.is_create() { "create" } else { "delete" };
        write!(f, "{verb} {}/{}", self.runtime(), self.service_name())
    }
}

/// A provider-unique service name for `runtime`.
pub fn fresh_service_name(runtime: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let name = format!("{runtime}-{}", &id[..NAME_SUFFIX_LEN]);
    debug!(%runtime, service = %name, "generated service name");
    name
}
