//! Reconcilers for the two custom resources
//!
//! The policy controller programs the watcher pool from RecoveryPolicy
//! objects; the snapshot controller drives retention expiry and restores.
//! Both share the finalizer plumbing below.

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;

pub mod policy;
pub mod snapshot;

/// Whether the object currently carries the given finalizer
pub(crate) fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to the named object if it is not already present
///
/// Reads the current object first: the copy a reconcile pass holds goes
/// stale as soon as the pass patches metadata, and a merge patch built from
/// a stale finalizer list would drop entries added in between.
pub(crate) async fn ensure_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let Some(current) = api.get_opt(name).await? else {
        debug!(name = %name, "object not found, skipping finalizer addition");
        return Ok(());
    };
    if has_finalizer(&current, finalizer) {
        return Ok(());
    }

    let mut finalizers = current.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Remove a finalizer from the named object if present
pub(crate) async fn remove_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let Some(current) = api.get_opt(name).await? else {
        debug!(name = %name, "object not found, finalizer already removed");
        return Ok(());
    };
    if !has_finalizer(&current, finalizer) {
        return Ok(());
    }

    let finalizers: Vec<String> = current
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
