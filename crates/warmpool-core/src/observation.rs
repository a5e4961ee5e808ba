//! Provider-agnostic observation records.
//!
//! A backend returns these from its bulk list calls. They are unfiltered:
//! the controller partitions them per runtime using their labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Container, RevisionTemplate};

/// Where a traffic entry points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "revision", rename_all = "snake_case")]
pub enum TrafficTarget {
    /// Follows whatever revision is newest.
    Latest,
    /// Pinned to a named revision.
    Revision(String),
}

/// One observed traffic allocation entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficTargetStatus {
    pub target: TrafficTarget,
    pub percent: u32,
}

/// One observed service, as listed by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceObservation {
    /// Short service name (no `projects/.../services/` prefix).
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub reconciling: bool,
    pub ready: bool,
    /// Endpoint; empty until the service is ready.
    pub uri: String,
    pub observed_generation: i64,
    pub latest_ready_revision: Option<String>,
    pub traffic: Vec<TrafficTargetStatus>,
}

/// One observed revision, as listed by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionObservation {
    /// Short revision name, e.g. `web-3f2a-1`.
    pub name: String,
    /// Short name of the owning service.
    pub service: String,
    pub labels: BTreeMap<String, String>,
    pub reconciling: bool,
    pub deleted: bool,
    pub observed_generation: i64,
    pub min_scale: u32,
    pub max_scale: u32,
    pub max_concurrency: u32,
    pub timeout_secs: u64,
    pub containers: Vec<Container>,
}

impl RevisionObservation {
    /// Copy the observed spec into a definition record.
    pub fn definition(&self) -> RevisionTemplate {
        RevisionTemplate {
            name: self.name.clone(),
            min_scale: self.min_scale,
            max_scale: self.max_scale,
            max_concurrency: self.max_concurrency,
            timeout_secs: self.timeout_secs,
            containers: self.containers.clone(),
        }
    }
}
