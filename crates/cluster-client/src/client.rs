//! Kubernetes implementation of [`ClusterClient`].

use crate::cluster_trait::{ClusterClient, LabelChanges};
use crate::error::ClusterError;
use crds::labels::selector_string;
use crds::{CcRuntime, CcRuntimeStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Node};
use k8s_openapi::api::node::v1::RuntimeClass;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// [`ClusterClient`] backed by a kube-rs [`Client`].
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn runtimes(&self) -> Api<CcRuntime> {
        Api::all(self.client.clone())
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn daemonsets(&self, namespace: &str) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn runtime_classes(&self) -> Api<RuntimeClass> {
        Api::all(self.client.clone())
    }
}

/// `metadata` patch fragment carrying the resourceVersion precondition, if any.
fn versioned_metadata(resource_version: Option<&str>) -> serde_json::Map<String, Value> {
    let mut metadata = serde_json::Map::new();
    if let Some(rv) = resource_version {
        metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
    }
    metadata
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_runtime(&self, name: &str) -> Result<Option<CcRuntime>, ClusterError> {
        Ok(self.runtimes().get_opt(name).await?)
    }

    async fn patch_runtime_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &CcRuntimeStatus,
    ) -> Result<CcRuntime, ClusterError> {
        let patch = json!({
            "metadata": versioned_metadata(resource_version),
            "status": serde_json::to_value(status)?,
        });
        let updated = self
            .runtimes()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(runtime = %name, "Patched CcRuntime status");
        Ok(updated)
    }

    async fn patch_runtime_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<CcRuntime, ClusterError> {
        let mut metadata = versioned_metadata(resource_version);
        metadata.insert("finalizers".to_string(), json!(finalizers));
        let patch = json!({ "metadata": metadata });
        Ok(self
            .runtimes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list_nodes(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<Node>, ClusterError> {
        let mut params = ListParams::default();
        if !match_labels.is_empty() {
            params = params.labels(&selector_string(match_labels));
        }
        Ok(self.nodes().list(&params).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        Ok(self.nodes().get_opt(name).await?)
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        changes: &LabelChanges,
    ) -> Result<Node, ClusterError> {
        let mut metadata = versioned_metadata(resource_version);
        // Merge patch: null removes the key
        metadata.insert("labels".to_string(), serde_json::to_value(changes)?);
        let patch = json!({ "metadata": metadata });
        Ok(self
            .nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        Ok(self.daemonsets(namespace).get_opt(name).await?)
    }

    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        let namespace = daemonset.metadata.namespace.as_deref().ok_or_else(|| {
            ClusterError::Api {
                code: 422,
                reason: "Invalid".to_string(),
                message: format!(
                    "DaemonSet {} has no namespace",
                    daemonset.metadata.name.as_deref().unwrap_or("<unnamed>")
                ),
            }
        })?;
        Ok(self
            .daemonsets(namespace)
            .create(&PostParams::default(), daemonset)
            .await?)
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.daemonsets(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn get_runtime_class(&self, name: &str) -> Result<Option<RuntimeClass>, ClusterError> {
        Ok(self.runtime_classes().get_opt(name).await?)
    }

    async fn create_runtime_class(&self, runtime_class: &RuntimeClass) -> Result<RuntimeClass, ClusterError> {
        Ok(self
            .runtime_classes()
            .create(&PostParams::default(), runtime_class)
            .await?)
    }

    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_metadata() {
        assert!(versioned_metadata(None).is_empty());
        let metadata = versioned_metadata(Some("42"));
        assert_eq!(metadata.get("resourceVersion"), Some(&json!("42")));
    }
}
