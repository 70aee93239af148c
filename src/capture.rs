//! Delete-capture pipeline: one task per watcher record
//!
//! Each pipeline subscribes to delete events for a single (apiVersion,
//! resource, namespace) tuple and turns matching deletions into Snapshot
//! objects. The pipeline runs until its stop signal closes; every per-event
//! failure is logged and dropped without retry so one bad object can never
//! wedge the watcher.

use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::{Api, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::crd::{
    split_api_version, RecoveryPolicy, ResourceSelector, Snapshot, SnapshotSpec,
    RECOVERY_CONFIG_LABEL, RETENTION_TIME_LABEL, RETENTION_UNTIL_LABEL, SAVED_AT_LABEL,
};
use crate::discovery::ResourceResolver;
use crate::error::{is_already_exists, Error};
use crate::pool::WatcherPool;
use crate::retention;

/// Metadata fields stripped from a captured object before storage
pub const STRIPPED_METADATA_FIELDS: [&str; 4] = [
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "managedFields",
];

/// Everything a capture pipeline needs, shared by value at spawn time
#[derive(Clone)]
pub struct CaptureContext {
    /// Kubernetes client for creating Snapshots
    pub client: Client,
    /// Resolver for mapping a deleted object's kind to its resource
    pub resolver: Arc<dyn ResourceResolver>,
    /// Pool the pipeline re-reads its record from on every event
    pub pool: Arc<WatcherPool>,
    /// Key of this pipeline's record in the pool
    pub key: String,
}

/// Spawn a capture pipeline for the record stored under `ctx.key`
pub fn spawn(ctx: CaptureContext) {
    tokio::spawn(run(ctx));
}

/// Run the capture pipeline until its stop signal closes
pub async fn run(ctx: CaptureContext) {
    let Some(record) = ctx.pool.get(&ctx.key) else {
        warn!(key = %ctx.key, "watcher record missing at startup, not watching");
        return;
    };
    if record.stop.is_closed() {
        return;
    }

    let api = dynamic_api(
        &ctx.client,
        &record.api_version,
        &record.resource,
        &record.namespace,
    );
    let mut stop = record.stop.subscribe();
    let mut events = pin!(watcher::watcher(api, watcher::Config::default()));

    info!(
        api_version = %record.api_version,
        resource = %record.resource,
        namespace = %record.namespace,
        "watching delete events"
    );

    loop {
        tokio::select! {
            _ = stop.changed() => {
                info!(
                    api_version = %record.api_version,
                    resource = %record.resource,
                    namespace = %record.namespace,
                    "stopping delete watcher"
                );
                return;
            }
            event = events.next() => match event {
                Some(Ok(Event::Delete(obj))) => handle_delete(&ctx, obj).await,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(
                        error = %e,
                        resource = %record.resource,
                        namespace = %record.namespace,
                        "watch error, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                None => {
                    warn!(resource = %record.resource, "watch stream ended");
                    return;
                }
            }
        }
    }
}

/// Build the ApiResource addressing one watched plural resource
///
/// The kind is left empty: this resource is only ever used for watching,
/// where the request path is derived from the plural alone.
fn watch_api_resource(api_version: &str, resource: &str) -> ApiResource {
    let (group, version) = split_api_version(api_version);
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: api_version.to_string(),
        kind: String::new(),
        plural: resource.to_string(),
    }
}

/// Build a dynamic client scoped to one resource and namespace
///
/// An empty namespace produces a cluster-wide client.
pub fn dynamic_api(
    client: &Client,
    api_version: &str,
    resource: &str,
    namespace: &str,
) -> Api<DynamicObject> {
    let api_resource = watch_api_resource(api_version, resource);

    if namespace.is_empty() {
        Api::all_with(client.clone(), &api_resource)
    } else {
        Api::namespaced_with(client.clone(), namespace, &api_resource)
    }
}

/// Process one delete event
async fn handle_delete(ctx: &CaptureContext, obj: DynamicObject) {
    // Re-fetch the record: if the key is gone the watcher is being torn down
    // and this event must not produce a Snapshot.
    let Some(record) = ctx.pool.get(&ctx.key) else {
        debug!(key = %ctx.key, "watcher no longer in pool, dropping delete event");
        return;
    };
    let policy = record.policy.clone();

    let Some(types) = obj.types.clone() else {
        warn!(name = %obj.name_any(), "deleted object carries no type information, dropping");
        return;
    };

    // The exclusion rules match on the resource name, not the kind
    let (group, version) = split_api_version(&types.api_version);
    let resolved = match ctx.resolver.resolve(group, version, &types.kind).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, name = %obj.name_any(), "cannot resolve deleted object, skipping event");
            return;
        }
    };

    let namespace = obj.namespace().unwrap_or_default();
    if is_excluded(
        &policy.spec.resources_excluded,
        &types.api_version,
        &resolved.plural,
        &namespace,
    ) {
        info!(
            api_version = %types.api_version,
            resource = %resolved.plural,
            namespace = %namespace,
            "deleted object is excluded from recovery"
        );
        return;
    }

    let snapshot = match build_snapshot(&policy, &obj, Utc::now()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, name = %obj.name_any(), "failed to build snapshot, dropping event");
            return;
        }
    };

    let snapshots: Api<Snapshot> = Api::all(ctx.client.clone());
    match snapshots.create(&PostParams::default(), &snapshot).await {
        Ok(created) => {
            info!(
                api_version = %types.api_version,
                kind = %types.kind,
                namespace = %namespace,
                name = %obj.name_any(),
                snapshot = %created.name_any(),
                "deleted object saved as snapshot"
            );
        }
        Err(e) if is_already_exists(&e) => {
            warn!(
                snapshot = %snapshot.name_any(),
                "snapshot already exists, dropping duplicate delete event"
            );
        }
        Err(e) => {
            warn!(error = %e, snapshot = %snapshot.name_any(), "failed to save snapshot");
        }
    }
}

/// Decide whether a deletion matches any exclusion rule
///
/// Resource and namespace entries are regex patterns with substring
/// semantics; apiVersion is compared exactly. A pattern that fails to
/// compile drops the event (fail-closed): a broken exclusion must not
/// silently capture what the user meant to exclude.
pub fn is_excluded(
    rules: &[ResourceSelector],
    api_version: &str,
    resource: &str,
    namespace: &str,
) -> bool {
    for rule in rules {
        for resource_pattern in &rule.resources {
            for namespace_pattern in &rule.namespaces {
                let resource_re = match Regex::new(resource_pattern) {
                    Ok(re) => re,
                    Err(e) => {
                        warn!(pattern = %resource_pattern, error = %e, "invalid resource exclusion regex, dropping event");
                        return true;
                    }
                };
                let namespace_re = match Regex::new(namespace_pattern) {
                    Ok(re) => re,
                    Err(e) => {
                        warn!(pattern = %namespace_pattern, error = %e, "invalid namespace exclusion regex, dropping event");
                        return true;
                    }
                };

                if rule.api_version == api_version
                    && resource_re.is_match(resource)
                    && namespace_re.is_match(namespace)
                {
                    return true;
                }
            }
        }
    }
    false
}

/// Strip the volatile metadata fields from a captured or restored object
pub fn sanitize_object(body: &mut serde_json::Value) {
    if let Some(metadata) = body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in STRIPPED_METADATA_FIELDS {
            metadata.remove(field);
        }
    }
}

/// Build the Snapshot recording a deleted object
///
/// The name is deterministic down to the second; the labels carry the full
/// retention contract so the snapshot reconciler never needs the policy.
pub fn build_snapshot(
    policy: &RecoveryPolicy,
    obj: &DynamicObject,
    now: DateTime<Utc>,
) -> Result<Snapshot, Error> {
    let policy_name = policy
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal("capture", "policy has no name"))?;
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .ok_or_else(|| Error::serialization("deleted object has no kind"))?;

    let period = &policy.spec.retention.period;
    let retention_period = retention::parse_retention_period(period)?;

    let mut body = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    sanitize_object(&mut body);

    let name = retention::snapshot_name(policy_name, kind, &obj.name_any(), now);
    let mut snapshot = Snapshot::new(&name, SnapshotSpec(body));
    snapshot.metadata.labels = Some(BTreeMap::from([
        (
            SAVED_AT_LABEL.to_string(),
            retention::format_label_time(now),
        ),
        (
            RETENTION_UNTIL_LABEL.to_string(),
            retention::format_label_time(now + retention_period),
        ),
        (RECOVERY_CONFIG_LABEL.to_string(), policy_name.to_string()),
        (RETENTION_TIME_LABEL.to_string(), period.clone()),
    ]));
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{RecoveryPolicySpec, RetentionSpec};
    use chrono::TimeZone;
    use kube::api::GroupVersionKind;

    fn exclusion(api_version: &str, resources: &[&str], namespaces: &[&str]) -> ResourceSelector {
        ResourceSelector {
            api_version: api_version.to_string(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sample_policy(period: &str) -> RecoveryPolicy {
        RecoveryPolicy::new(
            "policy1",
            RecoveryPolicySpec {
                resources_included: vec![],
                resources_excluded: vec![],
                retention: RetentionSpec {
                    period: period.to_string(),
                },
            },
        )
    }

    fn deleted_configmap(name: &str, namespace: &str) -> DynamicObject {
        let gvk = GroupVersionKind {
            group: String::new(),
            version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        };
        let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(&gvk)).within(namespace);
        obj.metadata.resource_version = Some("4711".to_string());
        obj.metadata.uid = Some("aaaa-bbbb".to_string());
        obj.data = serde_json::json!({"data": {"key": "value"}});
        obj
    }

    // =========================================================================
    // Exclusion matching
    // =========================================================================

    #[test]
    fn exclusion_matches_resource_and_namespace_regex() {
        let rules = vec![exclusion("v1", &["config.*"], &["kube-.*"])];

        assert!(is_excluded(&rules, "v1", "configmaps", "kube-system"));
        assert!(!is_excluded(&rules, "v1", "configmaps", "default"));
        assert!(!is_excluded(&rules, "v1", "secrets", "kube-system"));
    }

    #[test]
    fn exclusion_requires_exact_api_version() {
        let rules = vec![exclusion("apps/v1", &[".*"], &[".*"])];

        assert!(is_excluded(&rules, "apps/v1", "deployments", "prod"));
        assert!(!is_excluded(&rules, "apps/v1beta1", "deployments", "prod"));
        assert!(!is_excluded(&rules, "v1", "deployments", "prod"));
    }

    #[test]
    fn exclusion_patterns_match_substrings() {
        // Unanchored patterns behave like substring matches
        let rules = vec![exclusion("v1", &["map"], &["sys"])];
        assert!(is_excluded(&rules, "v1", "configmaps", "kube-system"));
    }

    #[test]
    fn invalid_regex_fails_closed() {
        let rules = vec![exclusion("v1", &["[unclosed"], &["default"])];
        assert!(is_excluded(&rules, "v1", "configmaps", "default"));

        // Even a rule for a different apiVersion drops the event: the
        // pattern is evaluated before the apiVersion comparison.
        let rules = vec![exclusion("apps/v1", &["[unclosed"], &["default"])];
        assert!(is_excluded(&rules, "v1", "configmaps", "default"));
    }

    #[test]
    fn rule_without_namespaces_never_matches() {
        let rules = vec![exclusion("v1", &["configmaps"], &[])];
        assert!(!is_excluded(&rules, "v1", "configmaps", "default"));
    }

    #[test]
    fn no_rules_means_nothing_excluded() {
        assert!(!is_excluded(&[], "v1", "configmaps", "default"));
    }

    // =========================================================================
    // Sanitization
    // =========================================================================

    #[test]
    fn sanitize_strips_exactly_the_volatile_fields() {
        let mut body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "foo",
                "namespace": "default",
                "labels": {"app": "demo"},
                "annotations": {"note": "kept"},
                "resourceVersion": "4711",
                "uid": "aaaa-bbbb",
                "creationTimestamp": "2025-03-14T09:26:53Z",
                "managedFields": [{"manager": "kubectl"}],
            },
            "data": {"key": "value"},
        });
        sanitize_object(&mut body);

        let metadata = body["metadata"].as_object().unwrap();
        assert!(metadata.contains_key("name"));
        assert!(metadata.contains_key("namespace"));
        assert!(metadata.contains_key("labels"));
        assert!(metadata.contains_key("annotations"));
        for field in STRIPPED_METADATA_FIELDS {
            assert!(!metadata.contains_key(field), "{field} should be stripped");
        }
        assert_eq!(body["data"]["key"], "value");
    }

    #[test]
    fn sanitize_tolerates_objects_without_metadata() {
        let mut body = serde_json::json!({"kind": "Weird"});
        sanitize_object(&mut body);
        assert_eq!(body, serde_json::json!({"kind": "Weird"}));
    }

    // =========================================================================
    // Snapshot construction
    // =========================================================================

    #[test]
    fn snapshot_name_and_labels_follow_the_contract() {
        let policy = sample_policy("1h");
        let obj = deleted_configmap("foo", "default");
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();

        let snapshot = build_snapshot(&policy, &obj, now).unwrap();
        assert_eq!(snapshot.name_any(), "policy1-configmap-foo-20250314092653");

        let labels = snapshot.labels();
        assert_eq!(labels[SAVED_AT_LABEL], "2025-03-14T092653");
        assert_eq!(labels[RETENTION_UNTIL_LABEL], "2025-03-14T102653");
        assert_eq!(labels[RECOVERY_CONFIG_LABEL], "policy1");
        assert_eq!(labels[RETENTION_TIME_LABEL], "1h");
    }

    #[test]
    fn snapshot_retention_spans_exactly_the_period() {
        let policy = sample_policy("7d");
        let obj = deleted_configmap("foo", "default");
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let snapshot = build_snapshot(&policy, &obj, now).unwrap();
        let labels = snapshot.labels();
        let saved_at = retention::parse_label_time(&labels[SAVED_AT_LABEL]).unwrap();
        let retain_until = retention::parse_label_time(&labels[RETENTION_UNTIL_LABEL]).unwrap();
        assert_eq!(retain_until - saved_at, chrono::Duration::hours(168));
    }

    #[test]
    fn snapshot_spec_is_the_sanitized_body() {
        let policy = sample_policy("1h");
        let obj = deleted_configmap("foo", "default");
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();

        let snapshot = build_snapshot(&policy, &obj, now).unwrap();
        let body = &snapshot.spec.0;
        assert_eq!(body["metadata"]["name"], "foo");
        assert_eq!(body["metadata"]["namespace"], "default");
        assert_eq!(body["apiVersion"], "v1");
        assert_eq!(body["kind"], "ConfigMap");
        assert_eq!(body["data"]["key"], "value");
        assert!(body["metadata"].get("resourceVersion").is_none());
        assert!(body["metadata"].get("uid").is_none());
    }

    #[test]
    fn snapshot_build_rejects_bad_retention() {
        let policy = sample_policy("soon");
        let obj = deleted_configmap("foo", "default");
        let result = build_snapshot(&policy, &obj, Utc::now());
        assert!(matches!(result, Err(Error::InvalidDuration { .. })));
    }

    // =========================================================================
    // Watch addressing
    // =========================================================================

    #[test]
    fn watch_api_resource_splits_grouped_versions() {
        let ar = watch_api_resource("apps/v1", "deployments");
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "deployments");
    }

    #[test]
    fn watch_api_resource_handles_the_core_group() {
        let ar = watch_api_resource("v1", "configmaps");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "configmaps");
    }
}
