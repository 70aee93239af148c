//! Supporting status types shared by both CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported by both reconcilers
pub const CONDITION_TYPE_RESOURCE_SYNCED: &str = "ResourceSynced";

/// Reason set when a reconcile pass converged successfully
pub const CONDITION_REASON_TARGET_SYNCED: &str = "TargetSynced";

/// Reason set when a Kubernetes API call failed during reconcile
pub const CONDITION_REASON_API_CALL_ERROR: &str = "KubernetesApiCallError";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ResourceSynced)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// The ResourceSynced=True condition for a converged object
    pub fn resource_synced() -> Self {
        Self::new(
            CONDITION_TYPE_RESOURCE_SYNCED,
            ConditionStatus::True,
            CONDITION_REASON_TARGET_SYNCED,
            "the object is synchronized with the cluster",
        )
    }

    /// The ResourceSynced=False condition after a failed API call
    pub fn api_call_failed(message: impl Into<String>) -> Self {
        Self::new(
            CONDITION_TYPE_RESOURCE_SYNCED,
            ConditionStatus::False,
            CONDITION_REASON_API_CALL_ERROR,
            message,
        )
    }
}

/// Upsert a condition into a status condition list, keyed by condition type
///
/// The transition time of an existing condition is preserved when neither
/// status nor reason changed, so repeated reconciles don't churn the status.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status && existing.reason == condition.reason {
                existing.message = condition.message;
            } else {
                *existing = condition;
            }
        }
        None => conditions.push(condition),
    }
}
