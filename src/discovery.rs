//! Resolution of group/version/kind to the served resource
//!
//! Capture and restore both start from a kind (taken off the object itself)
//! and need the plural resource name plus the scope to talk to the API.
//! Resolution goes through the cluster's discovery endpoint on every call;
//! callers treat failures as per-event errors and keep their watchers alive.

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;

use crate::error::Error;

/// A resolved resource: everything needed to address objects of one GVK
#[derive(Clone, Debug)]
pub struct ResolvedResource {
    /// Plural resource name, e.g. `deployments`
    pub plural: String,
    /// Whether objects of this resource live in a namespace
    pub namespaced: bool,
    /// The kube ApiResource for building dynamic clients
    pub api_resource: ApiResource,
}

/// Resolves a group/version/kind to its served resource
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Resolve `(group, version, kind)`; errors surface to the caller for
    /// logging and must not tear down the surrounding watcher
    async fn resolve(&self, group: &str, version: &str, kind: &str)
        -> Result<ResolvedResource, Error>;
}

/// ResourceResolver backed by the cluster's discovery API
pub struct ClusterResolver {
    client: Client,
}

impl ClusterResolver {
    /// Create a resolver using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceResolver for ClusterResolver {
    async fn resolve(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<ResolvedResource, Error> {
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };

        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::discovery(&api_version, kind, e.to_string()))?;

        let gvk = GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        };

        let (api_resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
            Error::discovery(&api_version, kind, "no served resource matches this kind")
        })?;

        Ok(ResolvedResource {
            plural: api_resource.plural.clone(),
            namespaced: capabilities.scope == Scope::Namespaced,
            api_resource,
        })
    }
}
