//! Label keys used for ownership tagging.

use std::collections::BTreeMap;

/// Identifying label: its value is the owning runtime's name.
pub const RUNTIME_LABEL: &str = "wp_runtime";

/// Assignment label: present only on assigned services, value is the
/// assignment key.
pub const ASSIGNMENT_LABEL: &str = "wp_assignment";

/// Whether `labels` marks the resource as owned by `runtime`.
pub fn belongs_to(labels: &BTreeMap<String, String>, runtime: &str) -> bool {
    labels.get(RUNTIME_LABEL).is_some_and(|value| value == runtime)
}

/// The assignment key, if the resource has been handed out.
pub fn assignment_key(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(ASSIGNMENT_LABEL).map(String::as_str)
}

/// Render labels as `k=v, k=v` in key order.
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
