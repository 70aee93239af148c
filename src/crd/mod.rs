//! Custom Resource Definitions and the public label/finalizer contract

mod recovery_policy;
mod snapshot;
pub mod types;

pub use recovery_policy::{
    RecoveryPolicy, RecoveryPolicySpec, RecoveryPolicyStatus, ResourceSelector, RetentionSpec,
    WatchTarget,
};
pub use snapshot::{Snapshot, SnapshotSpec, SnapshotStatus};
pub use types::{Condition, ConditionStatus};

/// API group of both CRDs
pub const API_GROUP: &str = "kuberecovery.freepik.com";

/// API version of both CRDs
pub const API_VERSION: &str = "v1alpha1";

// Labels are the authoritative Snapshot metadata and a stable public
// contract; the names below are load-bearing for existing objects.

/// Label carrying the retention deadline (`YYYY-MM-DDThhmmss`, UTC)
pub const RETENTION_UNTIL_LABEL: &str = "kuberecovery.freepik.com/retentionUntil";

/// Label carrying the capture timestamp (`YYYY-MM-DDThhmmss`, UTC)
pub const SAVED_AT_LABEL: &str = "kuberecovery.freepik.com/savedAt";

/// Label naming the RecoveryPolicy that captured the Snapshot
pub const RECOVERY_CONFIG_LABEL: &str = "kuberecovery.freepik.com/recoveryConfig";

/// Label the user sets to trigger a restore
pub const RESTORE_LABEL: &str = "kuberecovery.freepik.com/restore";

/// The only restore label value that triggers a restore
pub const RESTORE_LABEL_VALUE: &str = "true";

/// Informational label carrying the original retention period string
pub const RETENTION_TIME_LABEL: &str = "kuberecovery.freepik.com/retentionTime";

/// Standard reconcile finalizer carried by both CRDs
pub const RECONCILE_FINALIZER: &str = "kuberecovery.freepik.com/finalizer";

/// Protective finalizer carried by a Snapshot until it expires
pub const PROTECT_FINALIZER: &str = "kuberecovery.freepik.com/protectFinalizer";

/// Split an apiVersion string into (group, version)
///
/// The first `/` separates group and version; a bare version like `"v1"`
/// belongs to the core group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
