//! RecoveryPolicy reconciler
//!
//! Converges the watcher pool towards the set of watchers a policy declares:
//! new (resource, namespace) pairs get a capture pipeline, stale pairs are
//! stopped, and policy edits that don't change the watcher set (exclusion
//! rules, retention) are swapped into the existing records in place so no
//! delete event is lost to a watcher restart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{info, instrument, warn};

use super::{ensure_finalizer, has_finalizer, remove_finalizer};
use crate::capture::{self, CaptureContext};
use crate::crd::types::{set_condition, Condition};
use crate::crd::{RecoveryPolicy, RecoveryPolicyStatus, WatchTarget, RECONCILE_FINALIZER};
use crate::discovery::ResourceResolver;
use crate::error::Error;
use crate::pool::{watcher_key, WatcherPool, WatcherRecord};

/// Controller context shared across policy reconciliations
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Resolver handed to spawned capture pipelines
    pub resolver: Arc<dyn ResourceResolver>,
    /// The shared watcher pool
    pub pool: Arc<WatcherPool>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, resolver: Arc<dyn ResourceResolver>, pool: Arc<WatcherPool>) -> Self {
        Self {
            client,
            resolver,
            pool,
        }
    }
}

/// Reconcile a RecoveryPolicy
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any()))]
pub async fn reconcile(policy: Arc<RecoveryPolicy>, ctx: Arc<Context>) -> Result<Action, Error> {
    let api: Api<RecoveryPolicy> = Api::all(ctx.client.clone());

    // Terminating: tear down every watcher owned by this policy, then let
    // the object go.
    if policy.metadata.deletion_timestamp.is_some() {
        if has_finalizer(policy.as_ref(), RECONCILE_FINALIZER) {
            teardown_policy_watchers(&ctx.pool, &policy.name_any());
            remove_finalizer(&api, &policy.name_any(), RECONCILE_FINALIZER).await?;
        }
        return Ok(Action::await_change());
    }

    ensure_finalizer(&api, &policy.name_any(), RECONCILE_FINALIZER).await?;

    let result = converge(&ctx, &policy);

    // The status condition is written on every exit and must not mask the
    // reconciliation error.
    let condition = match &result {
        Ok(()) => Condition::resource_synced(),
        Err(e) => Condition::api_call_failed(e.to_string()),
    };
    if let Err(e) = update_status(&api, &policy, condition).await {
        warn!(error = %e, "failed to update policy status");
    }
    result?;

    Ok(Action::await_change())
}

/// Error policy: requeue transient failures, wait for a spec change otherwise
pub fn error_policy(policy: Arc<RecoveryPolicy>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(policy = %policy.name_any(), error = %error, "policy reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

/// What a convergence pass has to do to the pool
#[derive(Debug, Default, PartialEq)]
struct ConvergePlan {
    /// Keys to create, with the target each watcher covers
    start: Vec<(String, WatchTarget)>,
    /// Existing keys whose policy reference must be swapped in place
    update: Vec<String>,
    /// Keys owned by this policy that are no longer desired
    stop: Vec<String>,
}

/// Diff the policy's desired watcher set against the pool
fn plan_convergence(pool: &WatcherPool, policy: &RecoveryPolicy) -> ConvergePlan {
    let name = policy.name_any();
    let mut plan = ConvergePlan::default();
    let mut desired_keys = HashSet::new();

    for target in policy.desired_watchers() {
        let key = watcher_key(&name, &target.api_version, &target.resource, &target.namespace);
        desired_keys.insert(key.clone());

        match pool.get(&key) {
            Some(existing) => {
                if existing.policy.spec != policy.spec {
                    plan.update.push(key);
                }
            }
            None => plan.start.push((key, target)),
        }
    }

    for (key, _) in pool.entries_for_policy(&name) {
        if !desired_keys.contains(&key) {
            plan.stop.push(key);
        }
    }
    plan
}

/// Apply the convergence plan: start, update and stop watchers
fn converge(ctx: &Context, policy: &Arc<RecoveryPolicy>) -> Result<(), Error> {
    let plan = plan_convergence(&ctx.pool, policy);

    for (key, target) in plan.start {
        info!(
            api_version = %target.api_version,
            resource = %target.resource,
            namespace = %target.namespace,
            "starting delete watcher"
        );
        ctx.pool
            .set(key.clone(), WatcherRecord::new(policy.clone(), &target));
        capture::spawn(CaptureContext {
            client: ctx.client.clone(),
            resolver: ctx.resolver.clone(),
            pool: ctx.pool.clone(),
            key,
        });
    }

    for key in plan.update {
        info!(key = %key, "policy changed, updating watcher in place");
        ctx.pool.update_policy(&key, policy.clone());
    }

    for key in plan.stop {
        stop_watcher(&ctx.pool, &key);
    }
    Ok(())
}

/// Stop one watcher: remove its record from the pool, then close its signal
///
/// The record leaves the pool before its signal closes, so a delete event
/// racing the stop finds no record and drops itself. Every stop path goes
/// through here; the order must not diverge between them.
fn stop_watcher(pool: &WatcherPool, key: &str) {
    if let Some(record) = pool.get(key) {
        info!(
            api_version = %record.api_version,
            resource = %record.resource,
            namespace = %record.namespace,
            "stopping delete watcher"
        );
        pool.delete(key);
        record.stop.close();
    }
}

/// Destroy every watcher keyed to the named policy
fn teardown_policy_watchers(pool: &WatcherPool, policy_name: &str) {
    for (key, _) in pool.entries_for_policy(policy_name) {
        stop_watcher(pool, &key);
    }
}

/// Patch the ResourceSynced condition into the policy status
async fn update_status(
    api: &Api<RecoveryPolicy>,
    policy: &RecoveryPolicy,
    condition: Condition,
) -> Result<(), Error> {
    let mut conditions = policy
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(&mut conditions, condition);

    let patch = serde_json::json!({"status": RecoveryPolicyStatus { conditions }});
    api.patch_status(
        &policy.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
