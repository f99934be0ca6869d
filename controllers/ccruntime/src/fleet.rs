//! Read-only view of the node fleet.

use cluster_client::{ClusterClient, ClusterError};
use crds::SignalLabel;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::debug;

/// Node queries used by the reconciler. Nothing here is cached between calls.
pub struct FleetView<'a> {
    client: &'a dyn ClusterClient,
}

impl<'a> FleetView<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> Self {
        Self { client }
    }

    /// Nodes matching the CcRuntime's effective selector.
    pub async fn eligible_nodes(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.client.list_nodes(selector).await?;
        debug!(count = nodes.len(), "Listed eligible nodes");
        Ok(nodes)
    }

    /// Nodes carrying `label` with its exact value.
    pub async fn nodes_with_label(&self, label: &SignalLabel) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.client.list_nodes(&label.as_map()).await?;
        debug!(label = %label.key(), count = nodes.len(), "Listed labelled nodes");
        Ok(nodes)
    }

    pub async fn all_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.client.list_nodes(&BTreeMap::new()).await
    }
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Names of the nodes in `nodes` that carry `label`, in listing order.
pub fn names_carrying<'n>(nodes: &'n [Node], label: &SignalLabel) -> impl Iterator<Item = &'n str> {
    nodes
        .iter()
        .filter(move |n| label.is_carried_by(n.metadata.labels.as_ref()))
        .map(node_name)
}
