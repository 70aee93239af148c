//! Snapshot Custom Resource Definition
//!
//! A Snapshot is the persisted record of a deleted object. Its spec is the
//! full sanitized body of the original resource, stored opaquely; everything
//! the reconciler needs to know (who captured it, when, until when, whether a
//! restore was requested) lives in labels so it can be queried with selectors.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use super::{RESTORE_LABEL, RESTORE_LABEL_VALUE, RETENTION_UNTIL_LABEL};
use crate::error::Error;
use crate::retention;

/// Status of a Snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SnapshotStatus {
    /// Status conditions; at least `ResourceSynced`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Specification for a Snapshot: the sanitized body of the deleted object
///
/// The body is opaque to the operator. It is written once by the capture
/// pipeline and never mutated afterwards.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kuberecovery.freepik.com",
    version = "v1alpha1",
    kind = "Snapshot",
    plural = "snapshots",
    status = "SnapshotStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct SnapshotSpec(
    /// The captured object, with volatile metadata stripped
    #[schemars(schema_with = "preserve_arbitrary_object")]
    pub serde_json::Value,
);

/// Schema hook marking the snapshot body as an arbitrary embedded object
fn preserve_arbitrary_object(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::json!(true),
    );
    schemars::schema::Schema::Object(schema)
}

impl Snapshot {
    /// The deadline after which this snapshot may be reclaimed
    ///
    /// Parsed from the retentionUntil label. A missing or unparseable label
    /// is an error: such a snapshot must never be deleted automatically.
    pub fn retain_until(&self) -> Result<DateTime<Utc>, Error> {
        let value = self
            .labels()
            .get(RETENTION_UNTIL_LABEL)
            .ok_or_else(|| Error::invalid_timestamp("", "retentionUntil label is missing"))?;
        retention::parse_label_time(value)
    }

    /// Whether the retention deadline has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> Result<bool, Error> {
        Ok(now >= self.retain_until()?)
    }

    /// Whether the user has requested a restore of this snapshot
    pub fn restore_requested(&self) -> bool {
        self.labels().get(RESTORE_LABEL).map(String::as_str) == Some(RESTORE_LABEL_VALUE)
    }
}
