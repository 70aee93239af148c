//! RecoveryPolicy Custom Resource Definition
//!
//! A RecoveryPolicy declares which resources should be captured on deletion,
//! which deletions to ignore, and how long captured Snapshots are retained.
//! The policy controller turns each policy into a set of per-(resource,
//! namespace) delete watchers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Selector for a set of resources within one API group/version
///
/// In `resourcesIncluded`, `resources` are plural resource names (the native
/// identifier the dynamic API expects) and `namespaces` are literal names.
/// In `resourcesExcluded`, `resources` and `namespaces` entries are regex
/// patterns matched against the deleted object, while `apiVersion` is always
/// compared by exact string equality.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    /// API group/version, e.g. `v1` or `apps/v1`
    pub api_version: String,

    /// Plural resource names (or regex patterns when excluding)
    pub resources: Vec<String>,

    /// Namespaces to watch (or regex patterns when excluding).
    /// Empty, or the single entry `"*"`, means all namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl ResourceSelector {
    /// Namespaces this selector effectively targets
    ///
    /// An empty list and the `["*"]` wildcard both collapse to the single
    /// empty namespace, which the watcher layer treats as cluster-wide.
    pub fn effective_namespaces(&self) -> Vec<String> {
        if self.namespaces.is_empty() || self.namespaces == ["*"] {
            vec![String::new()]
        } else {
            self.namespaces.clone()
        }
    }
}

/// Retention configuration for captured Snapshots
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RetentionSpec {
    /// How long Snapshots created by this policy are kept, e.g. `"12h"` or
    /// `"7d"`. Units `s`, `m`, `h` and `d` are accepted.
    pub period: String,
}

/// Status of a RecoveryPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RecoveryPolicyStatus {
    /// Status conditions; at least `ResourceSynced`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A watch target derived from a policy's inclusion rules
///
/// One target corresponds to one watcher: a single plural resource in a
/// single namespace (empty namespace = all namespaces).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    /// API group/version of the watched resource
    pub api_version: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace scope; empty string means cluster-wide
    pub namespace: String,
}

/// Specification for a RecoveryPolicy
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kuberecovery.freepik.com",
    version = "v1alpha1",
    kind = "RecoveryPolicy",
    plural = "recoverypolicies",
    status = "RecoveryPolicyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicySpec {
    /// Resources whose deletions are captured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_included: Vec<ResourceSelector>,

    /// Deletions to ignore, matched by regex against resource and namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_excluded: Vec<ResourceSelector>,

    /// Retention applied to Snapshots created by this policy
    pub retention: RetentionSpec,
}

impl RecoveryPolicy {
    /// Compute the set of watch targets this policy declares
    ///
    /// The cartesian product of each inclusion rule's `resources` and its
    /// effective namespaces, deduplicated so that overlapping rules cannot
    /// produce two watchers for the same (resource, namespace) pair.
    pub fn desired_watchers(&self) -> Vec<WatchTarget> {
        let mut seen = std::collections::HashSet::new();
        let mut targets = Vec::new();

        for rule in &self.spec.resources_included {
            for resource in &rule.resources {
                for namespace in rule.effective_namespaces() {
                    let target = WatchTarget {
                        api_version: rule.api_version.clone(),
                        resource: resource.clone(),
                        namespace,
                    };
                    if seen.insert(target.clone()) {
                        targets.push(target);
                    }
                }
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_spec(yaml: &str) -> RecoveryPolicySpec {
        serde_yaml::from_str(yaml).expect("parse spec")
    }

    fn policy_with_spec(spec: RecoveryPolicySpec) -> RecoveryPolicy {
        RecoveryPolicy::new("policy1", spec)
    }

    #[test]
    fn test_policy_spec_parses_camel_case() {
        let spec = parse_spec(
            r#"
resourcesIncluded:
  - apiVersion: v1
    resources: ["configmaps", "secrets"]
    namespaces: ["default"]
resourcesExcluded:
  - apiVersion: v1
    resources: ["config.*"]
    namespaces: ["kube-.*"]
retention:
  period: "12h"
"#,
        );

        assert_eq!(spec.resources_included.len(), 1);
        assert_eq!(spec.resources_included[0].api_version, "v1");
        assert_eq!(
            spec.resources_included[0].resources,
            vec!["configmaps", "secrets"]
        );
        assert_eq!(spec.resources_excluded[0].resources, vec!["config.*"]);
        assert_eq!(spec.retention.period, "12h");
    }

    #[test]
    fn test_spec_defaults() {
        let spec = parse_spec(
            r#"
retention:
  period: "1h"
"#,
        );
        assert!(spec.resources_included.is_empty());
        assert!(spec.resources_excluded.is_empty());
    }

    #[test]
    fn empty_namespaces_means_cluster_wide() {
        let selector = ResourceSelector {
            api_version: "v1".to_string(),
            resources: vec!["configmaps".to_string()],
            namespaces: vec![],
        };
        assert_eq!(selector.effective_namespaces(), vec![String::new()]);
    }

    #[test]
    fn wildcard_namespace_means_cluster_wide() {
        let selector = ResourceSelector {
            api_version: "v1".to_string(),
            resources: vec!["configmaps".to_string()],
            namespaces: vec!["*".to_string()],
        };
        assert_eq!(selector.effective_namespaces(), vec![String::new()]);
    }

    #[test]
    fn explicit_namespaces_are_kept() {
        let selector = ResourceSelector {
            api_version: "v1".to_string(),
            resources: vec!["configmaps".to_string()],
            namespaces: vec!["default".to_string(), "prod".to_string()],
        };
        assert_eq!(selector.effective_namespaces(), vec!["default", "prod"]);
    }

    #[test]
    fn desired_watchers_is_the_cartesian_product() {
        let policy = policy_with_spec(RecoveryPolicySpec {
            resources_included: vec![ResourceSelector {
                api_version: "v1".to_string(),
                resources: vec!["configmaps".to_string(), "secrets".to_string()],
                namespaces: vec!["default".to_string(), "prod".to_string()],
            }],
            resources_excluded: vec![],
            retention: RetentionSpec {
                period: "1h".to_string(),
            },
        });

        let targets = policy.desired_watchers();
        assert_eq!(targets.len(), 4);
        assert!(targets.contains(&WatchTarget {
            api_version: "v1".to_string(),
            resource: "secrets".to_string(),
            namespace: "prod".to_string(),
        }));
    }

    #[test]
    fn desired_watchers_collapses_wildcard_to_single_target() {
        let policy = policy_with_spec(RecoveryPolicySpec {
            resources_included: vec![ResourceSelector {
                api_version: "apps/v1".to_string(),
                resources: vec!["deployments".to_string()],
                namespaces: vec!["*".to_string()],
            }],
            resources_excluded: vec![],
            retention: RetentionSpec {
                period: "1d".to_string(),
            },
        });

        let targets = policy.desired_watchers();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].namespace, "");
    }

    #[test]
    fn desired_watchers_deduplicates_overlapping_rules() {
        let selector = ResourceSelector {
            api_version: "v1".to_string(),
            resources: vec!["configmaps".to_string()],
            namespaces: vec!["default".to_string()],
        };
        let policy = policy_with_spec(RecoveryPolicySpec {
            resources_included: vec![selector.clone(), selector],
            resources_excluded: vec![],
            retention: RetentionSpec {
                period: "1h".to_string(),
            },
        });

        assert_eq!(policy.desired_watchers().len(), 1);
    }

    #[test]
    fn exclusion_only_edit_leaves_desired_watchers_unchanged() {
        let included = vec![ResourceSelector {
            api_version: "v1".to_string(),
            resources: vec!["configmaps".to_string()],
            namespaces: vec!["default".to_string()],
        }];
        let before = policy_with_spec(RecoveryPolicySpec {
            resources_included: included.clone(),
            resources_excluded: vec![],
            retention: RetentionSpec {
                period: "1h".to_string(),
            },
        });
        let after = policy_with_spec(RecoveryPolicySpec {
            resources_included: included,
            resources_excluded: vec![ResourceSelector {
                api_version: "v1".to_string(),
                resources: vec!["config.*".to_string()],
                namespaces: vec!["kube-.*".to_string()],
            }],
            retention: RetentionSpec {
                period: "1h".to_string(),
            },
        });

        assert_eq!(before.desired_watchers(), after.desired_watchers());
        assert_ne!(before.spec, after.spec);
    }
}
