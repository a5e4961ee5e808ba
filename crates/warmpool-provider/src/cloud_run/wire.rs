//! Cloud Run Admin API v2 JSON shapes and their conversion to
//! observations.
//!
//! Only the fields the controller reads or writes are modelled; unknown
//! fields are ignored on decode. int64 fields arrive as JSON strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use warmpool_core::{
    Container, RevisionObservation, RevisionTemplate, ServiceObservation, TrafficTarget,
    TrafficTargetStatus,
};

const CONDITION_READY: &str = "Ready";
const CONDITION_SUCCEEDED: &str = "CONDITION_SUCCEEDED";
const TRAFFIC_LATEST: &str = "TRAFFIC_TARGET_ALLOCATION_TYPE_LATEST";
pub(crate) const INGRESS_ALL: &str = "INGRESS_TRAFFIC_ALL";
pub(crate) const INVOKER_ROLE: &str = "roles/run.invoker";
pub(crate) const ALL_USERS: &str = "allUsers";

// ── Resources ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingress: String,
    #[serde(default, skip_serializing)]
    pub reconciling: bool,
    #[serde(default, deserialize_with = "de_i64", skip_serializing)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing)]
    pub latest_ready_revision: String,
    #[serde(default, skip_serializing)]
    pub uri: String,
    #[serde(default, skip_serializing)]
    pub terminal_condition: Option<Condition>,
    #[serde(default, skip_serializing)]
    pub traffic_statuses: Vec<TrafficStatus>,
    #[serde(default)]
    pub template: Option<ServiceTemplate>,
    /// Kept so read-modify-write updates send it back unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceTemplate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub scaling: Option<Scaling>,
    #[serde(default)]
    pub max_instance_request_concurrency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub containers: Vec<WireContainer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Scaling {
    #[serde(default)]
    pub min_instance_count: u32,
    #[serde(default)]
    pub max_instance_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Condition {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrafficStatus {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub percent: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Revision {
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub reconciling: bool,
    #[serde(default, deserialize_with = "de_i64")]
    pub observed_generation: i64,
    #[serde(default)]
    pub delete_time: Option<String>,
    #[serde(default)]
    pub scaling: Option<Scaling>,
    #[serde(default)]
    pub max_instance_request_concurrency: u32,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub containers: Vec<WireContainer>,
}

// ── Envelopes ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListServicesResponse {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListRevisionsResponse {
    #[serde(default)]
    pub revisions: Vec<Revision>,
    #[serde(default)]
    pub next_page_token: String,
}

/// A long-running operation.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<Status>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// `{ "error": { ... } }` body returned with non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Status,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetIamPolicyRequest {
    pub policy: Policy,
}

#[derive(Debug, Serialize)]
pub(crate) struct Policy {
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Binding {
    pub role: String,
    pub members: Vec<String>,
}

// ── Conversion ────────────────────────────────────────────────────

/// Last path segment of a resource name such as
/// `projects/p/locations/l/services/web-1`.
pub(crate) fn short_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

/// Parse a protobuf JSON duration such as `"300s"` or `"1.5s"`.
pub(crate) fn parse_proto_duration(value: &str) -> Option<u64> {
    let secs: f64 = value.strip_suffix('s')?.parse().ok()?;
    (secs >= 0.0).then(|| secs.round() as u64)
}

impl Service {
    /// Request body for creating a service from a template.
    pub fn for_create(
        name: &str,
        labels: &BTreeMap<String, String>,
        revision: &RevisionTemplate,
    ) -> Self {
        Self {
            description: "Managed by warmpool".to_string(),
            labels: labels.clone(),
            ingress: INGRESS_ALL.to_string(),
            template: Some(ServiceTemplate::from_template(name, labels, revision)),
            ..Self::default()
        }
    }

    pub fn into_observation(self) -> ServiceObservation {
        let ready = self
            .terminal_condition
            .as_ref()
            .is_some_and(|c| c.kind == CONDITION_READY && c.state == CONDITION_SUCCEEDED);

        let traffic = self
            .traffic_statuses
            .into_iter()
            .map(|status| TrafficTargetStatus {
                target: if status.kind == TRAFFIC_LATEST {
                    TrafficTarget::Latest
                } else {
                    TrafficTarget::Revision(short_name(&status.revision).to_string())
                },
                percent: status.percent,
            })
            .collect();

        let latest_ready_revision = (!self.latest_ready_revision.is_empty())
            .then(|| short_name(&self.latest_ready_revision).to_string());

        ServiceObservation {
            name: short_name(&self.name).to_string(),
            labels: self.labels,
            reconciling: self.reconciling,
            ready,
            uri: self.uri,
            observed_generation: self.observed_generation,
            latest_ready_revision,
            traffic,
        }
    }
}

impl ServiceTemplate {
    pub fn from_template(
        service: &str,
        labels: &BTreeMap<String, String>,
        revision: &RevisionTemplate,
    ) -> Self {
        Self {
            revision: revision.revision_name(service),
            labels: labels.clone(),
            scaling: Some(Scaling {
                min_instance_count: revision.min_scale,
                max_instance_count: revision.max_scale,
            }),
            max_instance_request_concurrency: revision.max_concurrency,
            timeout: Some(format!("{}s", revision.timeout_secs)),
            containers: revision
                .containers
                .iter()
                .map(|c| WireContainer {
                    name: c.name.clone(),
                    image: c.image.clone(),
                    command: c.command.iter().cloned().collect(),
                    args: c.args.clone(),
                })
                .collect(),
        }
    }
}

impl Revision {
    pub fn into_observation(self) -> RevisionObservation {
        let scaling = self.scaling.unwrap_or_default();
        RevisionObservation {
            name: short_name(&self.name).to_string(),
            service: short_name(&self.service).to_string(),
            labels: self.labels,
            reconciling: self.reconciling,
            deleted: self.delete_time.is_some(),
            observed_generation: self.observed_generation,
            min_scale: scaling.min_instance_count,
            max_scale: scaling.max_instance_count,
            max_concurrency: self.max_instance_request_concurrency,
            timeout_secs: self
                .timeout
                .as_deref()
                .and_then(parse_proto_duration)
                .unwrap_or_default(),
            containers: self
                .containers
                .into_iter()
                .map(|c| Container {
                    name: c.name,
                    image: c.image,
                    command: c.command.into_iter().next(),
                    args: c.args,
                })
                .collect(),
        }
    }
}

fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::Int(value) => Ok(value),
        StringOrInt::String(value) => value.parse().map_err(serde::de::Error::custom),
    }
}
