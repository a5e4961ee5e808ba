//! Pool state types built from observations.
//!
//! A [`ServiceInstance`] is one provisioned compute unit with its
//! revisions in provider listing order. Instances are value snapshots:
//! they are rebuilt wholesale on every refresh and never patched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observation::{
    RevisionObservation, ServiceObservation, TrafficTarget, TrafficTargetStatus,
};
use crate::types::RevisionTemplate;

// ── Lifecycle state ────────────────────────────────────────────────

/// Observed lifecycle state of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceState {
    pub reconciling: bool,
    pub ready: bool,
    pub observed_generation: i64,
    pub latest_ready_revision: Option<String>,
}

impl ServiceState {
    pub fn from_observation(service: &ServiceObservation) -> Self {
        Self {
            reconciling: service.reconciling,
            ready: service.ready,
            observed_generation: service.observed_generation,
            latest_ready_revision: service.latest_ready_revision.clone(),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.ready { "READY" } else { "STOPPED" })?;
        if self.reconciling {
            f.write_str("(*)")?;
        }
        Ok(())
    }
}

/// Observed lifecycle state of a revision.
///
/// `traffic_percent` is only meaningful while the revision is not deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionState {
    pub reconciling: bool,
    pub deleted: bool,
    pub traffic_percent: u32,
    pub observed_generation: i64,
}

impl fmt::Display for RevisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deleted {
            f.write_str("DELETED")?;
        } else if self.traffic_percent > 0 {
            write!(f, "ACTIVE ({})", self.traffic_percent)?;
        } else {
            f.write_str("INACTIVE")?;
        }
        if self.reconciling {
            f.write_str("(*)")?;
        }
        Ok(())
    }
}

// ── Traffic ────────────────────────────────────────────────────────

/// How a service's traffic is allocated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", content = "revisions", rename_all = "snake_case")]
pub enum TrafficStatus {
    /// All traffic follows the newest revision.
    Latest,
    /// Explicit per-revision percentages.
    Split(BTreeMap<String, u32>),
}

impl TrafficStatus {
    pub fn from_statuses(statuses: &[TrafficTargetStatus]) -> Self {
        if let [only] = statuses
            && only.target == TrafficTarget::Latest
        {
            return TrafficStatus::Latest;
        }

        let split = statuses
            .iter()
            .filter_map(|status| match &status.target {
                TrafficTarget::Revision(name) => Some((name.clone(), status.percent)),
                TrafficTarget::Latest => None,
            })
            .collect();
        TrafficStatus::Split(split)
    }
}

/// Policy for assigning a traffic percentage to each revision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrafficPolicy {
    /// A service following "latest" sends 100% to its newest revision.
    #[default]
    #[serde(alias = "latest")]
    LatestGetsAll,
    /// Only explicit per-revision entries count; "latest" yields 0.
    #[serde(alias = "explicit")]
    ExplicitOnly,
}

impl TrafficPolicy {
    /// Percentage for `revision`. `newest` names the revision considered
    /// latest for this service, if any.
    pub fn percent_for(
        &self,
        traffic: &TrafficStatus,
        revision: &str,
        newest: Option<&str>,
    ) -> u32 {
        match traffic {
            TrafficStatus::Split(split) => split.get(revision).copied().unwrap_or(0),
            TrafficStatus::Latest => match self {
                TrafficPolicy::LatestGetsAll if newest == Some(revision) => 100,
                _ => 0,
            },
        }
    }
}

// ── Instances ──────────────────────────────────────────────────────

/// An observed revision of a service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionInstance {
    pub definition: RevisionTemplate,
    pub labels: BTreeMap<String, String>,
    pub state: RevisionState,
}

/// An observed service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    pub name: String,
    pub state: ServiceState,
    pub uri: String,
    pub traffic: TrafficStatus,
    /// Revisions in provider listing order.
    pub revisions: Vec<RevisionInstance>,
}

impl ServiceInstance {
    /// Build an instance from a service observation and the revisions
    /// grouped under its name.
    pub fn build(
        service: &ServiceObservation,
        revisions: &[&RevisionObservation],
        policy: TrafficPolicy,
    ) -> Self {
        let traffic = TrafficStatus::from_statuses(&service.traffic);

        // The provider's latest-ready pointer wins; otherwise the first
        // live revision in listing order.
        let newest = service
            .latest_ready_revision
            .as_deref()
            .filter(|name| revisions.iter().any(|r| r.name == *name && !r.deleted))
            .or_else(|| revisions.iter().find(|r| !r.deleted).map(|r| r.name.as_str()));

        let revisions = revisions
            .iter()
            .map(|revision| {
                let traffic_percent = if revision.deleted {
                    0
                } else {
                    policy.percent_for(&traffic, &revision.name, newest)
                };
                RevisionInstance {
                    definition: revision.definition(),
                    labels: revision.labels.clone(),
                    state: RevisionState {
                        reconciling: revision.reconciling,
                        deleted: revision.deleted,
                        traffic_percent,
                        observed_generation: revision.observed_generation,
                    },
                }
            })
            .collect();

        Self {
            name: service.name.clone(),
            state: ServiceState::from_observation(service),
            uri: service.uri.clone(),
            traffic,
            revisions,
        }
    }

    /// The first live revision in listing order.
    pub fn newest_revision(&self) -> Option<&RevisionInstance> {
        self.revisions.iter().find(|r| !r.state.deleted)
    }

    /// Revision name with the `<service>-` prefix stripped.
    pub fn revision_suffix<'a>(&self, revision: &'a RevisionInstance) -> &'a str {
        let name = revision.definition.name.as_str();
        name.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, traffic: Vec<TrafficTargetStatus>) -> ServiceObservation {
        ServiceObservation {
            name: name.to_string(),
            labels: BTreeMap::new(),
            reconciling: false,
            ready: true,
            uri: format!("https://{name}.run.app"),
            observed_generation: 1,
            latest_ready_revision: None,
            traffic,
        }
    }

    fn revision(service: &str, suffix: &str, deleted: bool) -> RevisionObservation {
        RevisionObservation {
            name: format!("{service}-{suffix}"),
            service: service.to_string(),
            labels: BTreeMap::new(),
            reconciling: false,
            deleted,
            observed_generation: 1,
            min_scale: 0,
            max_scale: 1,
            max_concurrency: 80,
            timeout_secs: 300,
            containers: vec![],
        }
    }

    fn latest() -> Vec<TrafficTargetStatus> {
        vec![TrafficTargetStatus {
            target: TrafficTarget::Latest,
            percent: 100,
        }]
    }

    #[test]
    fn service_state_display() {
        let mut state = ServiceState {
            reconciling: false,
            ready: true,
            observed_generation: 1,
            latest_ready_revision: None,
        };
        assert_eq!(state.to_string(), "READY");
        state.ready = false;
        state.reconciling = true;
        assert_eq!(state.to_string(), "STOPPED(*)");
    }

    #[test]
    fn revision_state_display() {
        let mut state = RevisionState {
            reconciling: false,
            deleted: false,
            traffic_percent: 0,
            observed_generation: 1,
        };
        assert_eq!(state.to_string(), "INACTIVE");
        state.traffic_percent = 40;
        assert_eq!(state.to_string(), "ACTIVE (40)");
        state.deleted = true;
        state.reconciling = true;
        assert_eq!(state.to_string(), "DELETED(*)");
    }

    #[test]
    fn single_latest_entry_means_latest() {
        assert_eq!(TrafficStatus::from_statuses(&latest()), TrafficStatus::Latest);
    }

    #[test]
    fn explicit_entries_form_split() {
        let statuses = vec![
            TrafficTargetStatus {
                target: TrafficTarget::Revision("svc-1".to_string()),
                percent: 30,
            },
            TrafficTargetStatus {
                target: TrafficTarget::Revision("svc-2".to_string()),
                percent: 70,
            },
        ];
        let TrafficStatus::Split(split) = TrafficStatus::from_statuses(&statuses) else {
            panic!("expected split");
        };
        assert_eq!(split.get("svc-2"), Some(&70));
    }

    #[test]
    fn latest_policy_gives_newest_everything() {
        let svc = service("svc", latest());
        let r2 = revision("svc", "2", false);
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r2, &r1], TrafficPolicy::LatestGetsAll);

        assert_eq!(instance.revisions[0].state.traffic_percent, 100);
        assert_eq!(instance.revisions[1].state.traffic_percent, 0);
    }

    #[test]
    fn latest_ready_pointer_overrides_listing_order() {
        let mut svc = service("svc", latest());
        svc.latest_ready_revision = Some("svc-1".to_string());
        let r2 = revision("svc", "2", false);
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r2, &r1], TrafficPolicy::LatestGetsAll);

        assert_eq!(instance.revisions[0].state.traffic_percent, 0);
        assert_eq!(instance.revisions[1].state.traffic_percent, 100);
    }

    #[test]
    fn explicit_policy_ignores_latest_marker() {
        let svc = service("svc", latest());
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r1], TrafficPolicy::ExplicitOnly);
        assert_eq!(instance.revisions[0].state.traffic_percent, 0);
    }

    fn split(entries: &[(&str, u32)]) -> Vec<TrafficTargetStatus> {
        entries
            .iter()
            .map(|(name, percent)| TrafficTargetStatus {
                target: TrafficTarget::Revision(name.to_string()),
                percent: *percent,
            })
            .collect()
    }

    #[test]
    fn explicit_split_is_read_per_revision_under_both_policies() {
        let mut svc = service("svc", split(&[("svc-2", 70), ("svc-1", 30)]));
        svc.latest_ready_revision = Some("svc-3".to_string());
        let r3 = revision("svc", "3", false);
        let r2 = revision("svc", "2", false);
        let r1 = revision("svc", "1", false);

        for policy in [TrafficPolicy::LatestGetsAll, TrafficPolicy::ExplicitOnly] {
            let instance = ServiceInstance::build(&svc, &[&r3, &r2, &r1], policy);
            let percents: Vec<_> = instance
                .revisions
                .iter()
                .map(|r| r.state.traffic_percent)
                .collect();
            assert_eq!(percents, [0, 70, 30], "{policy:?}");
        }
    }

    #[test]
    fn deleted_revision_in_split_gets_no_traffic() {
        let svc = service("svc", split(&[("svc-2", 50), ("svc-1", 50)]));
        let r2 = revision("svc", "2", true);
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r2, &r1], TrafficPolicy::default());

        assert_eq!(instance.revisions[0].state.traffic_percent, 0);
        assert_eq!(instance.revisions[1].state.traffic_percent, 50);
        assert_eq!(instance.revisions[1].state.to_string(), "ACTIVE (50)");
    }

    #[test]
    fn deleted_revisions_get_no_traffic() {
        let svc = service("svc", latest());
        let r2 = revision("svc", "2", true);
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r2, &r1], TrafficPolicy::LatestGetsAll);

        assert_eq!(instance.revisions[0].state.traffic_percent, 0);
        assert_eq!(instance.revisions[1].state.traffic_percent, 100);
        assert_eq!(instance.newest_revision().map(|r| r.definition.name.as_str()), Some("svc-1"));
    }

    #[test]
    fn revision_suffix_strips_service_prefix() {
        let svc = service("svc", latest());
        let r1 = revision("svc", "1", false);
        let instance = ServiceInstance::build(&svc, &[&r1], TrafficPolicy::default());
        assert_eq!(instance.revision_suffix(&instance.revisions[0]), "1");
    }
}
