//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and driving the
//! reconciler against `MockClusterClient` the way the watch loop would.

use crate::reconciler::{Reconciled, Reconciler};
use crate::workload::WorkloadContext;
use cluster_client::MockClusterClient;
use crds::*;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const TEST_PAYLOAD_IMAGE: &str = "quay.io/confidential-containers/runtime-payload:kata-containers-latest";
pub const WORKER: (&str, &str) = ("node-role.kubernetes.io/worker", "");
pub const INSTALL_DONE: (&str, &str) = ("katacontainers.io/kata-runtime", "true");
pub const UNINSTALL_DONE: (&str, &str) = ("katacontainers.io/kata-runtime", "cleanup");

pub fn test_workload_context() -> WorkloadContext {
    WorkloadContext {
        namespace: "confidential-containers-system".to_string(),
        name_prefix: "cc-operator".to_string(),
        service_account: "cc-operator-controller-manager".to_string(),
    }
}

/// Helper to create a test CcRuntime: kata, default selector, no hooks
pub fn create_test_runtime(name: &str) -> CcRuntime {
    let mut runtime = CcRuntime::new(
        name,
        CcRuntimeSpec {
            cc_node_selector: None,
            runtime_name: RuntimeName::Kata,
            config: CcInstallConfig {
                install_type: InstallType::Bundle,
                payload_image: TEST_PAYLOAD_IMAGE.to_string(),
                install_cmd: vec!["/opt/kata-artifacts/scripts/kata-deploy.sh".to_string(), "install".to_string()],
                uninstall_cmd: vec!["/opt/kata-artifacts/scripts/kata-deploy.sh".to_string(), "cleanup".to_string()],
                runtime_classes: vec![
                    RuntimeClassConfig {
                        name: "kata-qemu".to_string(),
                        ..Default::default()
                    },
                    RuntimeClassConfig {
                        name: "kata-clh".to_string(),
                        ..Default::default()
                    },
                ],
                install_done_label: labels(&[INSTALL_DONE]),
                uninstall_done_label: labels(&[UNINSTALL_DONE]),
                ..Default::default()
            },
            tolerations: None,
        },
    );
    runtime.metadata.uid = Some("4f1c2a9e-0000-4000-8000-000000000001".to_string());
    runtime
}

pub fn test_hook(image: &str) -> HookConfig {
    HookConfig {
        image: image.to_string(),
        ..Default::default()
    }
}

pub fn create_test_node(name: &str, node_labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(node_labels)),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Mock cluster plus a reconciler wired to it
pub fn create_test_reconciler() -> (MockClusterClient, Reconciler) {
    let mock = MockClusterClient::new();
    let reconciler = Reconciler::new(Box::new(mock.clone()), test_workload_context());
    (mock, reconciler)
}

/// Add `count` worker nodes named `worker-N`
pub fn add_workers(mock: &MockClusterClient, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let name = format!("worker-{i}");
            mock.add_node(&name, &[WORKER, ("kubernetes.io/os", "linux")]);
            name
        })
        .collect()
}

/// Reconcile and expect success
pub async fn reconcile(reconciler: &Reconciler, name: &str) -> Reconciled {
    match reconciler.reconcile_runtime(name).await {
        Ok(outcome) => outcome,
        Err(e) => panic!("reconcile of {name} failed: {e}"),
    }
}

pub fn status_of(mock: &MockClusterClient, name: &str) -> CcRuntimeStatus {
    mock.runtime(name).and_then(|r| r.status).unwrap_or_default()
}
