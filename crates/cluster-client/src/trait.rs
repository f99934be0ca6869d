//! ClusterClient trait for mocking
//!
//! This trait abstracts every Kubernetes call the CcRuntime controller makes.
//! `KubeClusterClient` implements it against a live API server, tests use
//! `MockClusterClient`.

use crate::error::ClusterError;
use crds::{CcRuntime, CcRuntimeStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::node::v1::RuntimeClass;
use std::collections::BTreeMap;

/// Label edits for a node: `Some(value)` sets the key, `None` removes it.
pub type LabelChanges = BTreeMap<String, Option<String>>;

/// Trait for Kubernetes API operations
///
/// Writes to the CcRuntime record and to node labels take the
/// `resource_version` the caller last observed. When it is `Some`, the API
/// server rejects the write with [`ClusterError::Conflict`] if the object
/// changed in the meantime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    // CcRuntime (cluster scoped)
    async fn get_runtime(&self, name: &str) -> Result<Option<CcRuntime>, ClusterError>;
    async fn patch_runtime_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &CcRuntimeStatus,
    ) -> Result<CcRuntime, ClusterError>;
    async fn patch_runtime_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<CcRuntime, ClusterError>;

    // Nodes
    /// Nodes whose labels contain every `match_labels` entry. An empty map lists all nodes.
    async fn list_nodes(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<Node>, ClusterError>;
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError>;
    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        changes: &LabelChanges,
    ) -> Result<Node, ClusterError>;

    // DaemonSets
    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError>;
    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError>;
    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // RuntimeClasses
    async fn get_runtime_class(&self, name: &str) -> Result<Option<RuntimeClass>, ClusterError>;
    async fn create_runtime_class(&self, runtime_class: &RuntimeClass) -> Result<RuntimeClass, ClusterError>;

    // Namespaces
    /// Merge `labels` into the namespace's labels.
    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ClusterError>;
}
