//! Assemble the provider and controller state from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use warmpool_controller::State;
use warmpool_core::config::{ProviderKind, ProviderSettings, parse_period};
use warmpool_core::WarmpoolConfig;
use warmpool_provider::{
    CloudRunConfig, CloudRunProvider, MemoryProvider, SharedProvider, TokenSource,
};

pub fn load_config(path: &Path) -> anyhow::Result<WarmpoolConfig> {
    let config = WarmpoolConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(path = %path.display(), runtimes = config.runtimes.len(), "configuration loaded");
    Ok(config)
}

pub fn build_provider(settings: &ProviderSettings) -> anyhow::Result<SharedProvider> {
    match settings.kind {
        ProviderKind::Memory => {
            info!("using in-memory provider");
            Ok(Arc::new(MemoryProvider::new()))
        }
        ProviderKind::CloudRun => {
            let project = settings
                .project()
                .context("provider.project is not set and GCP_PROJECT is empty")?;
            let location = settings
                .location()
                .context("provider.location is not set and GCP_REGION is empty")?;
            let config = CloudRunConfig {
                endpoint: settings.endpoint.clone(),
                project,
                location,
                operation_poll: parse_period(&settings.operation_poll)?,
                operation_timeout: parse_period(&settings.operation_timeout)?,
            };
            let tokens = TokenSource::from_env(&settings.token_env);
            let provider = CloudRunProvider::new(config, tokens)?;
            info!(parent = %provider.parent(), "using Cloud Run provider");
            Ok(Arc::new(provider))
        }
    }
}

/// Controller state with every configured runtime registered.
pub fn build_state(
    config: &WarmpoolConfig,
    provider: SharedProvider,
) -> anyhow::Result<Arc<State>> {
    let state = State::new(provider)
        .with_max_concurrency(config.controller.max_concurrency)
        .with_traffic_policy(config.controller.traffic_policy);
    for runtime in &config.runtimes {
        state
            .add_runtime(runtime.clone())
            .with_context(|| format!("registering runtime {}", runtime.name))?;
    }
    Ok(Arc::new(state))
}
