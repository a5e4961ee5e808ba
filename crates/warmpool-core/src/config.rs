//! warmpool.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::instance::TrafficPolicy;
use crate::types::RuntimeDefinition;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmpoolConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default, rename = "runtime")]
    pub runtimes: Vec<RuntimeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Time between reconcile cycles, e.g. "30s".
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Cap on concurrent provider operations per cycle.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub traffic_policy: TrafficPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_concurrency: None,
            traffic_policy: TrafficPolicy::default(),
        }
    }
}

fn default_interval() -> String {
    "30s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    5020
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    CloudRun,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Falls back to `GCP_PROJECT`.
    pub project: Option<String>,
    /// Falls back to `GCP_REGION`.
    pub location: Option<String>,
    /// Environment variable holding an OAuth bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_operation_poll")]
    pub operation_poll: String,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            project: None,
            location: None,
            token_env: default_token_env(),
            endpoint: default_endpoint(),
            operation_poll: default_operation_poll(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

fn default_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}

fn default_endpoint() -> String {
    "https://run.googleapis.com".to_string()
}

fn default_operation_poll() -> String {
    "1s".to_string()
}

fn default_operation_timeout() -> String {
    "5m".to_string()
}

impl ProviderSettings {
    pub fn project(&self) -> Option<String> {
        self.project
            .clone()
            .or_else(|| std::env::var("GCP_PROJECT").ok())
    }

    pub fn location(&self) -> Option<String> {
        self.location
            .clone()
            .or_else(|| std::env::var("GCP_REGION").ok())
    }
}

impl WarmpoolConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and normalize: runtime definitions get their identifying
    /// label, then every definition and duration is validated.
    pub fn parse(content: &str) -> CoreResult<Self> {
        let mut config: WarmpoolConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))?;

        config.runtimes = config
            .runtimes
            .into_iter()
            .map(RuntimeDefinition::with_identity_label)
            .collect();
        for runtime in &config.runtimes {
            runtime.validate()?;
        }

        parse_period(&config.controller.interval)?;
        parse_period(&config.provider.operation_poll)?;
        parse_period(&config.provider.operation_timeout)?;

        Ok(config)
    }

    pub fn interval(&self) -> CoreResult<Duration> {
        parse_period(&self.controller.interval)
    }
}

/// Like [`parse_duration`], but zero is rejected. Used for loop intervals,
/// poll periods and timeouts.
pub fn parse_period(s: &str) -> CoreResult<Duration> {
    let period = parse_duration(s)?;
    if period.is_zero() {
        return Err(CoreError::InvalidDuration(s.trim().to_string()));
    }
    Ok(period)
}

/// Parse a duration string like "500ms", "30s", "5m", "1h". A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());

    let (digits, scale_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::RUNTIME_LABEL;

    const SAMPLE: &str = r#"
[controller]
interval = "15s"
max_concurrency = 8
traffic_policy = "explicit"

[api]
port = 6000

[provider]
kind = "memory"
project = "acme"
location = "us-central1"

[[runtime]]
name = "web"
public = true
free_size = 3
labels = { team = "edge" }

[runtime.revision]
name = "1"
min_scale = 1
max_scale = 2
max_concurrency = 50
timeout_secs = 60
containers = [{ name = "deno", image = "gcr.io/acme/deno" }]
"#;

    #[test]
    fn parse_full_config() {
        let config = WarmpoolConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.interval().unwrap(), Duration::from_secs(15));
        assert_eq!(config.controller.max_concurrency, Some(8));
        assert_eq!(config.controller.traffic_policy, TrafficPolicy::ExplicitOnly);
        assert_eq!(config.api.port, 6000);
        assert_eq!(config.provider.kind, ProviderKind::Memory);
        assert_eq!(config.provider.project().as_deref(), Some("acme"));

        let web = &config.runtimes[0];
        assert_eq!(web.free_size, 3);
        assert_eq!(web.labels.get(RUNTIME_LABEL).map(String::as_str), Some("web"));
        assert_eq!(web.labels.get("team").map(String::as_str), Some("edge"));
        assert_eq!(web.revision.containers[0].name, "deno");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = WarmpoolConfig::parse("").unwrap();
        assert_eq!(config.interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.api.port, 5020);
        assert_eq!(config.provider.kind, ProviderKind::CloudRun);
        assert_eq!(config.provider.endpoint, "https://run.googleapis.com");
        assert!(config.runtimes.is_empty());
    }

    #[test]
    fn invalid_runtime_is_rejected() {
        let toml = r#"
[[runtime]]
name = "Bad_Name"
free_size = 1
[runtime.revision]
name = "1"
containers = [{ name = "a", image = "b" }]
"#;
        assert!(matches!(
            WarmpoolConfig::parse(toml),
            Err(CoreError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let toml = "[controller]\ninterval = \"soon\"\n";
        assert!(matches!(
            WarmpoolConfig::parse(toml),
            Err(CoreError::InvalidDuration(_))
        ));
    }

    #[test]
    fn zero_periods_are_rejected() {
        for toml in [
            "[controller]\ninterval = \"0s\"\n",
            "[provider]\noperation_poll = \"0ms\"\n",
            "[provider]\noperation_timeout = \"0\"\n",
        ] {
            assert!(
                matches!(WarmpoolConfig::parse(toml), Err(CoreError::InvalidDuration(_))),
                "accepted {toml:?}"
            );
        }
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert!(parse_period("0s").is_err());
        assert_eq!(parse_period("1ms").unwrap(), Duration::from_millis(1));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmpool.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = WarmpoolConfig::from_file(&path).unwrap();
        assert_eq!(config.runtimes.len(), 1);

        let missing = WarmpoolConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(CoreError::ConfigRead { .. })));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn shipped_config_parses() {
        let config = WarmpoolConfig::parse(include_str!("../../../warmpool.toml")).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Memory);
        assert_eq!(config.controller.max_concurrency, Some(8));
        let web = &config.runtimes[0];
        assert!(web.public);
        assert_eq!(web.labels.get(RUNTIME_LABEL).map(String::as_str), Some("web"));
        assert_eq!(web.labels.get("team").map(String::as_str), Some("edge"));
        assert_eq!(config.runtimes[1].revision.containers[0].args, ["--serve"]);
    }
}
