//! Watcher pool: the shared map of live delete watchers
//!
//! The pool is the only mutable state shared between the policy controller
//! and the capture pipelines. Keys encode the watcher identity
//! (`policy/apiVersion/resource/namespace`); records carry the current policy
//! snapshot and the stop signal of the backing watcher task.
//!
//! Ownership contract: the pool owns records, capture pipelines look records
//! up by key and never mutate them, and only the policy controller closes
//! stop signals. `delete` deliberately does NOT close the signal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::crd::{RecoveryPolicy, WatchTarget};

/// Build the pool key for a watcher
///
/// Format `"<policy>/<apiVersion>/<resource>/<namespace>"`; an empty
/// namespace denotes an all-namespace watch.
pub fn watcher_key(policy: &str, api_version: &str, resource: &str, namespace: &str) -> String {
    format!("{policy}/{api_version}/{resource}/{namespace}")
}

/// Single-shot stop signal for one watcher task
///
/// Closing is latching and must happen exactly once, by the policy
/// controller. Subscribers observe closure through their receiver.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Create an open stop signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close the signal, terminating the subscribed watcher task
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been closed
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the signal; `changed()` resolves once it closes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Whether two handles refer to the same underlying signal
    ///
    /// Used to verify that a policy update reused a watcher instead of
    /// recreating it.
    pub fn same_signal(&self, other: &StopHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A live watcher owned by the pool
#[derive(Clone)]
pub struct WatcherRecord {
    /// Current policy snapshot; replaced in place when the policy changes
    pub policy: Arc<RecoveryPolicy>,
    /// API group/version being watched
    pub api_version: String,
    /// Plural resource name being watched
    pub resource: String,
    /// Namespace scope; empty string means cluster-wide
    pub namespace: String,
    /// Stop signal of the backing watcher task
    pub stop: StopHandle,
}

impl WatcherRecord {
    /// Create a record for the given policy and watch target
    pub fn new(policy: Arc<RecoveryPolicy>, target: &WatchTarget) -> Self {
        Self {
            policy,
            api_version: target.api_version.clone(),
            resource: target.resource.clone(),
            namespace: target.namespace.clone(),
            stop: StopHandle::new(),
        }
    }

    /// Name of the policy owning this watcher
    pub fn policy_name(&self) -> String {
        self.policy.metadata.name.clone().unwrap_or_default()
    }
}

/// Thread-safe map from watcher key to live watcher record
///
/// Mutations are serialized behind the write lock; reads proceed in parallel.
/// The lock is never held across an await point.
#[derive(Default)]
pub struct WatcherPool {
    store: RwLock<HashMap<String, WatcherRecord>>,
}

impl WatcherPool {
    /// Insert or replace a record under the given key
    pub fn set(&self, key: impl Into<String>, record: WatcherRecord) {
        self.store
            .write()
            .expect("watcher pool lock poisoned")
            .insert(key.into(), record);
    }

    /// Look up a record by key
    pub fn get(&self, key: &str) -> Option<WatcherRecord> {
        self.store
            .read()
            .expect("watcher pool lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove a record; the stop signal is left to the caller
    pub fn delete(&self, key: &str) {
        self.store
            .write()
            .expect("watcher pool lock poisoned")
            .remove(key);
    }

    /// Replace the policy reference of an existing record in place
    ///
    /// Returns false when the key is no longer present (the watcher is being
    /// torn down concurrently).
    pub fn update_policy(&self, key: &str, policy: Arc<RecoveryPolicy>) -> bool {
        let mut store = self.store.write().expect("watcher pool lock poisoned");
        match store.get_mut(key) {
            Some(record) => {
                record.policy = policy;
                true
            }
            None => false,
        }
    }

    /// A point-in-time copy of every key and record in the pool
    pub fn entries(&self) -> Vec<(String, WatcherRecord)> {
        self.store
            .read()
            .expect("watcher pool lock poisoned")
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    /// All keys and records belonging to the named policy
    pub fn entries_for_policy(&self, policy_name: &str) -> Vec<(String, WatcherRecord)> {
        self.store
            .read()
            .expect("watcher pool lock poisoned")
            .iter()
            .filter(|(_, record)| record.policy_name() == policy_name)
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.store.read().expect("watcher pool lock poisoned").len()
    }

    /// Whether the pool holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
