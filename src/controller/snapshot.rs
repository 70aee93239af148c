//! Snapshot reconciler
//!
//! Drives the lifecycle of captured objects: a protective finalizer while
//! the snapshot is unexpired, deletion once the retention deadline passes,
//! and recreation of the original object when the restore label is set.
//! Re-enqueues itself every minute so expiry happens without edits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::{ensure_finalizer, has_finalizer, remove_finalizer};
use crate::capture::sanitize_object;
use crate::crd::types::{set_condition, Condition};
use crate::crd::{
    split_api_version, Snapshot, SnapshotStatus, PROTECT_FINALIZER, RECONCILE_FINALIZER,
    RESTORE_LABEL,
};
use crate::discovery::ResourceResolver;
use crate::error::{is_already_exists, is_not_found, Error};

/// How often snapshots re-enter the queue to check retention
const REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// Controller context shared across snapshot reconciliations
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Resolver for mapping a restored object's kind to its resource
    pub resolver: Arc<dyn ResourceResolver>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, resolver: Arc<dyn ResourceResolver>) -> Self {
        Self { client, resolver }
    }
}

/// Reconcile a Snapshot
#[instrument(skip(snapshot, ctx), fields(snapshot = %snapshot.name_any()))]
pub async fn reconcile(snapshot: Arc<Snapshot>, ctx: Arc<Context>) -> Result<Action, Error> {
    let api: Api<Snapshot> = Api::all(ctx.client.clone());

    // Terminating: release the reconcile finalizer and step aside. The
    // protect finalizer is deliberately NOT removed here; only the expiry
    // path lifts it, so a premature delete cannot reclaim an unexpired
    // snapshot.
    if snapshot.metadata.deletion_timestamp.is_some() {
        if has_finalizer(snapshot.as_ref(), RECONCILE_FINALIZER) {
            remove_finalizer(&api, &snapshot.name_any(), RECONCILE_FINALIZER).await?;
        }
        return Ok(Action::await_change());
    }

    ensure_finalizer(&api, &snapshot.name_any(), RECONCILE_FINALIZER).await?;

    let result = sync(&ctx, &api, &snapshot).await;

    let condition = match &result {
        Ok(()) => Condition::resource_synced(),
        Err(e) => Condition::api_call_failed(e.to_string()),
    };
    if let Err(e) = update_status(&api, &snapshot, condition).await {
        match &e {
            // Expired snapshots are deleted inside sync; their status is gone with them
            Error::Kube { source } if is_not_found(source) => {
                debug!("snapshot already deleted, skipping status update")
            }
            _ => warn!(error = %e, "failed to update snapshot status"),
        }
    }
    result?;

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Error policy: requeue transient failures, wait for object changes otherwise
pub fn error_policy(snapshot: Arc<Snapshot>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(snapshot = %snapshot.name_any(), error = %error, "snapshot reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

/// Expiry and restore handling for one live snapshot
async fn sync(ctx: &Context, api: &Api<Snapshot>, snapshot: &Snapshot) -> Result<(), Error> {
    let name = snapshot.name_any();

    // An unreadable deadline is terminal: report it, never delete.
    let retain_until = snapshot.retain_until()?;

    if Utc::now() >= retain_until {
        info!(snapshot = %name, retain_until = %retain_until, "snapshot expired, deleting");
        // The protective finalizer must come off before the delete or the
        // object would hang in Terminating.
        if has_finalizer(snapshot, PROTECT_FINALIZER) {
            remove_finalizer(api, &name, PROTECT_FINALIZER).await?;
        }
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    if !has_finalizer(snapshot, PROTECT_FINALIZER) {
        ensure_finalizer(api, &name, PROTECT_FINALIZER).await?;
    }

    if snapshot.restore_requested() {
        info!(snapshot = %name, "restore requested, recreating original object");
        let restore_result = restore(ctx, snapshot).await;
        if let Err(e) = &restore_result {
            warn!(snapshot = %name, error = %e, "restore failed");
        }
        // The trigger label comes off on every exit, success or failure,
        // so a failed restore cannot loop.
        clear_restore_label(api, &name).await?;
        restore_result?;
    }
    Ok(())
}

/// Recreate the original object from the snapshot body
async fn restore(ctx: &Context, snapshot: &Snapshot) -> Result<(), Error> {
    let mut body = snapshot.spec.0.clone();

    let api_version = body
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::serialization("snapshot body has no apiVersion"))?
        .to_string();
    let kind = body
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::serialization("snapshot body has no kind"))?
        .to_string();

    let (group, version) = split_api_version(&api_version);
    let resolved = ctx.resolver.resolve(group, version, &kind).await?;

    // The body was sanitized at capture time, but strip again so a snapshot
    // restored twice (or hand-edited) cannot smuggle a stale resourceVersion
    sanitize_object(&mut body);

    let namespace = object_namespace(&body);
    let obj: DynamicObject = serde_json::from_value(body)
        .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;

    let target: Api<DynamicObject> = if namespace.is_empty() {
        Api::all_with(ctx.client.clone(), &resolved.api_resource)
    } else {
        Api::namespaced_with(ctx.client.clone(), &namespace, &resolved.api_resource)
    };

    match target.create(&PostParams::default(), &obj).await {
        Ok(created) => {
            info!(
                api_version = %api_version,
                kind = %kind,
                namespace = %namespace,
                name = %created.name_any(),
                "restored object from snapshot"
            );
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            warn!(
                kind = %kind,
                namespace = %namespace,
                name = %obj.name_any(),
                "object already exists, restore conflict"
            );
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Namespace recorded in a captured object body; empty for cluster-scoped
fn object_namespace(body: &serde_json::Value) -> String {
    body.pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Remove the restore trigger label from the snapshot
async fn clear_restore_label(api: &Api<Snapshot>, name: &str) -> Result<(), Error> {
    let mut labels = serde_json::Map::new();
    labels.insert(RESTORE_LABEL.to_string(), serde_json::Value::Null);
    let patch = serde_json::json!({"metadata": {"labels": labels}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Patch the ResourceSynced condition into the snapshot status
async fn update_status(
    api: &Api<Snapshot>,
    snapshot: &Snapshot,
    condition: Condition,
) -> Result<(), Error> {
    let mut conditions = snapshot
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(&mut conditions, condition);

    let patch = serde_json::json!({"status": SnapshotStatus { conditions }});
    api.patch_status(
        &snapshot.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
