//! Desired-state types: runtime definitions and revision templates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::labels::{ASSIGNMENT_LABEL, RUNTIME_LABEL};

/// Longest runtime name accepted. Service names are `<runtime>-<12 hex>`
/// and the provider caps them at 49 characters.
pub const MAX_RUNTIME_NAME_LEN: usize = 30;

// ── Revision template ──────────────────────────────────────────────

/// One container in a revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// The code and resource spec applied to a service revision.
///
/// Used both as the template for new instances and as the definition
/// copied out of an observed revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionTemplate {
    /// Revision suffix; the provider revision is named `<service>-<name>`.
    pub name: String,
    #[serde(default)]
    pub min_scale: u32,
    #[serde(default = "default_max_scale")]
    pub max_scale: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    pub containers: Vec<Container>,
}

fn default_max_scale() -> u32 {
    1
}

fn default_max_concurrency() -> u32 {
    80
}

fn default_timeout_secs() -> u64 {
    300
}

impl RevisionTemplate {
    /// Provider revision name for this template on `service`.
    pub fn revision_name(&self, service: &str) -> String {
        format!("{service}-{}", self.name)
    }
}

// ── Runtime definition ─────────────────────────────────────────────

/// Desired state for one runtime: a warm pool of `free_size` idle
/// instances built from `revision`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeDefinition {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    /// Desired number of free (unassigned) instances.
    pub free_size: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub revision: RevisionTemplate,
}

impl RuntimeDefinition {
    /// Build a definition. The identifying label is always inserted.
    pub fn new(
        name: &str,
        public: bool,
        free_size: u32,
        labels: BTreeMap<String, String>,
        revision: RevisionTemplate,
    ) -> Self {
        Self {
            name: name.to_string(),
            public,
            free_size,
            labels,
            revision,
        }
        .with_identity_label()
    }

    /// Insert the identifying label if absent. Definitions read from
    /// config or the API go through this before registration.
    pub fn with_identity_label(mut self) -> Self {
        self.labels
            .entry(RUNTIME_LABEL.to_string())
            .or_insert_with(|| self.name.clone());
        self
    }

    /// Check naming, labels, and the revision template.
    pub fn validate(&self) -> CoreResult<()> {
        validate_runtime_name(&self.name)?;

        match self.labels.get(RUNTIME_LABEL) {
            Some(value) if value == &self.name => {}
            Some(value) => {
                return Err(CoreError::invalid(
                    &self.name,
                    format!("label {RUNTIME_LABEL}={value} does not match the runtime name"),
                ));
            }
            None => {
                return Err(CoreError::invalid(
                    &self.name,
                    format!("missing label {RUNTIME_LABEL}"),
                ));
            }
        }

        if self.labels.contains_key(ASSIGNMENT_LABEL) {
            return Err(CoreError::invalid(
                &self.name,
                format!("label {ASSIGNMENT_LABEL} is reserved for assigned instances"),
            ));
        }

        let revision = &self.revision;
        if revision.name.is_empty() {
            return Err(CoreError::invalid(&self.name, "revision name is empty"));
        }
        if revision.containers.is_empty() {
            return Err(CoreError::invalid(&self.name, "revision has no containers"));
        }
        if revision.min_scale > revision.max_scale {
            return Err(CoreError::invalid(
                &self.name,
                format!(
                    "min_scale {} exceeds max_scale {}",
                    revision.min_scale, revision.max_scale
                ),
            ));
        }

        let mut seen = BTreeSet::new();
        for container in &revision.containers {
            if container.image.is_empty() {
                return Err(CoreError::invalid(
                    &self.name,
                    format!("container `{}` has no image", container.name),
                ));
            }
            if !seen.insert(container.name.as_str()) {
                return Err(CoreError::invalid(
                    &self.name,
                    format!("duplicate container `{}`", container.name),
                ));
            }
        }

        Ok(())
    }
}

fn validate_runtime_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid(name, "name is empty"));
    }
    if name.len() > MAX_RUNTIME_NAME_LEN {
        return Err(CoreError::invalid(
            name,
            format!("name is longer than {MAX_RUNTIME_NAME_LEN} characters"),
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(CoreError::invalid(name, "name must start with a lowercase letter"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CoreError::invalid(
            name,
            "name may only contain lowercase letters, digits, and '-'",
        ));
    }
    Ok(())
}
