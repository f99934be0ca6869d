//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of [`ClusterClient`] that
//! behaves like a small API server: every write bumps the object's
//! resourceVersion, writes carrying a stale resourceVersion fail with
//! [`ClusterError::Conflict`], and a runtime marked for deletion disappears
//! once its last finalizer is released.

use crate::cluster_trait::{ClusterClient, LabelChanges};
use crate::error::ClusterError;
use crds::labels::selector_matches;
use crds::{CcRuntime, CcRuntimeStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::node::v1::RuntimeClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations recorded by the mock, also used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOperation {
    GetRuntime,
    PatchRuntimeStatus,
    PatchRuntimeFinalizers,
    ListNodes,
    GetNode,
    PatchNodeLabels,
    GetDaemonSet,
    CreateDaemonSet,
    DeleteDaemonSet,
    GetRuntimeClass,
    CreateRuntimeClass,
    LabelNamespace,
}

/// Failure returned by the next matching operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// 503 from the API server
    Unavailable,
    /// 409 as if another writer got there first
    Conflict,
}

impl MockFailure {
    fn into_error(self, op: MockOperation) -> ClusterError {
        match self {
            MockFailure::Unavailable => ClusterError::Api {
                code: 503,
                reason: "ServiceUnavailable".to_string(),
                message: format!("injected failure for {op:?}"),
            },
            MockFailure::Conflict => ClusterError::Conflict(format!("injected conflict for {op:?}")),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    runtimes: BTreeMap<String, CcRuntime>,
    nodes: BTreeMap<String, Node>,
    daemonsets: BTreeMap<(String, String), DaemonSet>,
    runtime_classes: BTreeMap<String, RuntimeClass>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    failures: Vec<(MockOperation, MockFailure)>,
    calls: Vec<MockOperation>,
    resource_version: u64,
}

impl MockState {
    /// Record the call and pop an injected failure for it, if any.
    fn enter(&mut self, op: MockOperation) -> Result<(), ClusterError> {
        self.calls.push(op);
        match self.failures.iter().position(|(target, _)| *target == op) {
            Some(index) => Err(self.failures.remove(index).1.into_error(op)),
            None => Ok(()),
        }
    }

    fn stamp(&mut self, metadata: &mut ObjectMeta) {
        self.resource_version += 1;
        metadata.resource_version = Some(self.resource_version.to_string());
        if metadata.uid.is_none() {
            metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
    }
}

/// Fail with Conflict when `expected` is set and differs from the stored version.
fn check_version(kind: &str, name: &str, metadata: &ObjectMeta, expected: Option<&str>) -> Result<(), ClusterError> {
    match expected {
        Some(rv) if metadata.resource_version.as_deref() != Some(rv) => Err(ClusterError::Conflict(format!(
            "{kind} {name} has been modified; expected resourceVersion {rv}, found {}",
            metadata.resource_version.as_deref().unwrap_or("<none>")
        ))),
        _ => Ok(()),
    }
}

/// Mock ClusterClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node with the given labels (for test setup)
    pub fn add_node(&self, name: &str, labels: &[(&str, &str)]) {
        let mut node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut state = self.state();
        state.stamp(&mut node.metadata);
        state.nodes.insert(name.to_string(), node);
    }

    /// Set a label on a node, as a node agent would
    pub fn set_node_label(&self, node: &str, key: &str, value: &str) {
        self.edit_node_labels(node, |labels| {
            labels.insert(key.to_string(), value.to_string());
        });
    }

    /// Remove a label from a node, as a node agent would
    pub fn remove_node_label(&self, node: &str, key: &str) {
        self.edit_node_labels(node, |labels| {
            labels.remove(key);
        });
    }

    fn edit_node_labels(&self, node: &str, edit: impl FnOnce(&mut BTreeMap<String, String>)) {
        let mut state = self.state();
        let mut metadata = match state.nodes.get_mut(node) {
            Some(n) => std::mem::take(&mut n.metadata),
            None => return,
        };
        edit(metadata.labels.get_or_insert_with(BTreeMap::new));
        state.stamp(&mut metadata);
        if let Some(n) = state.nodes.get_mut(node) {
            n.metadata = metadata;
        }
    }

    /// Current labels of a node
    pub fn node_labels(&self, node: &str) -> BTreeMap<String, String> {
        self.state()
            .nodes
            .get(node)
            .and_then(|n| n.metadata.labels.clone())
            .unwrap_or_default()
    }

    /// Store a CcRuntime (for test setup). Returns the stored copy with uid and resourceVersion assigned.
    pub fn add_runtime(&self, mut runtime: CcRuntime) -> CcRuntime {
        let name = runtime.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.stamp(&mut runtime.metadata);
        state.runtimes.insert(name, runtime.clone());
        runtime
    }

    /// Current stored CcRuntime
    pub fn runtime(&self, name: &str) -> Option<CcRuntime> {
        self.state().runtimes.get(name).cloned()
    }

    /// Set the deletion timestamp, as `kubectl delete` would. A runtime without finalizers is removed at once.
    pub fn mark_runtime_for_deletion(&self, name: &str) {
        let mut state = self.state();
        let Some(mut runtime) = state.runtimes.remove(name) else {
            return;
        };
        if runtime.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            return;
        }
        runtime.metadata.deletion_timestamp = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).ok();
        state.stamp(&mut runtime.metadata);
        state.runtimes.insert(name.to_string(), runtime);
    }

    pub fn daemonset(&self, namespace: &str, name: &str) -> Option<DaemonSet> {
        self.state()
            .daemonsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of all stored DaemonSets, sorted
    pub fn daemonset_names(&self) -> Vec<String> {
        self.state().daemonsets.keys().map(|(_, name)| name.clone()).collect()
    }

    pub fn runtime_class(&self, name: &str) -> Option<RuntimeClass> {
        self.state().runtime_classes.get(name).cloned()
    }

    /// Names of all stored RuntimeClasses, sorted
    pub fn runtime_class_names(&self) -> Vec<String> {
        self.state().runtime_classes.keys().cloned().collect()
    }

    pub fn namespace_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.state().namespaces.get(name).cloned().unwrap_or_default()
    }

    /// Make the next call of `op` fail. Failures queue up in order.
    pub fn fail_next(&self, op: MockOperation, failure: MockFailure) {
        self.state().failures.push((op, failure));
    }

    /// Number of times `op` was called
    pub fn calls(&self, op: MockOperation) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_runtime(&self, name: &str) -> Result<Option<CcRuntime>, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::GetRuntime)?;
        Ok(state.runtimes.get(name).cloned())
    }

    async fn patch_runtime_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &CcRuntimeStatus,
    ) -> Result<CcRuntime, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::PatchRuntimeStatus)?;
        let mut runtime = state
            .runtimes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("ccruntimes {name}")))?;
        check_version("CcRuntime", name, &runtime.metadata, resource_version)?;
        runtime.status = Some(status.clone());
        state.stamp(&mut runtime.metadata);
        state.runtimes.insert(name.to_string(), runtime.clone());
        Ok(runtime)
    }

    async fn patch_runtime_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<CcRuntime, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::PatchRuntimeFinalizers)?;
        let mut runtime = state
            .runtimes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("ccruntimes {name}")))?;
        check_version("CcRuntime", name, &runtime.metadata, resource_version)?;
        runtime.metadata.finalizers = (!finalizers.is_empty()).then(|| finalizers.to_vec());
        state.stamp(&mut runtime.metadata);
        if runtime.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
            state.runtimes.remove(name);
        } else {
            state.runtimes.insert(name.to_string(), runtime.clone());
        }
        Ok(runtime)
    }

    async fn list_nodes(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<Node>, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::ListNodes)?;
        Ok(state
            .nodes
            .values()
            .filter(|n| selector_matches(n.metadata.labels.as_ref(), match_labels))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::GetNode)?;
        Ok(state.nodes.get(name).cloned())
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        changes: &LabelChanges,
    ) -> Result<Node, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::PatchNodeLabels)?;
        let mut node = state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("nodes {name}")))?;
        check_version("Node", name, &node.metadata, resource_version)?;
        let labels = node.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in changes {
            match value {
                Some(v) => labels.insert(key.clone(), v.clone()),
                None => labels.remove(key),
            };
        }
        state.stamp(&mut node.metadata);
        state.nodes.insert(name.to_string(), node.clone());
        Ok(node)
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::GetDaemonSet)?;
        Ok(state
            .daemonsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::CreateDaemonSet)?;
        let key = (
            daemonset.metadata.namespace.clone().unwrap_or_default(),
            daemonset.metadata.name.clone().unwrap_or_default(),
        );
        if state.daemonsets.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("daemonsets.apps {}", key.1)));
        }
        let mut created = daemonset.clone();
        state.stamp(&mut created.metadata);
        state.daemonsets.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::DeleteDaemonSet)?;
        state
            .daemonsets
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(format!("daemonsets.apps {name}")))
    }

    async fn get_runtime_class(&self, name: &str) -> Result<Option<RuntimeClass>, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::GetRuntimeClass)?;
        Ok(state.runtime_classes.get(name).cloned())
    }

    async fn create_runtime_class(&self, runtime_class: &RuntimeClass) -> Result<RuntimeClass, ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::CreateRuntimeClass)?;
        let name = runtime_class.metadata.name.clone().unwrap_or_default();
        if state.runtime_classes.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(format!("runtimeclasses.node.k8s.io {name}")));
        }
        let mut created = runtime_class.clone();
        state.stamp(&mut created.metadata);
        state.runtime_classes.insert(name, created.clone());
        Ok(created)
    }

    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.enter(MockOperation::LabelNamespace)?;
        state
            .namespaces
            .entry(name.to_string())
            .or_default()
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}
