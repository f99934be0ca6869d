//! Main controller implementation.
//!
//! This module contains the `Controller` struct that prepares the target
//! namespace, builds the reconciler and runs the CcRuntime watcher.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::watch_runtimes;
use cluster_client::{ClusterClient, KubeClusterClient};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Pod security levels the agent pods need: they run privileged on the host.
const POD_SECURITY_LABELS: [&str; 3] = [
    "pod-security.kubernetes.io/enforce",
    "pod-security.kubernetes.io/audit",
    "pod-security.kubernetes.io/warn",
];

/// Main controller for CcRuntime resource management.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing CcRuntime Controller");

        let kube_client = Client::try_default().await?;
        let cluster_client = KubeClusterClient::new(kube_client.clone());

        if config.label_namespace {
            allow_privileged_pods(&cluster_client, &config.namespace).await?;
        }

        let reconciler = Arc::new(Reconciler::new(Box::new(cluster_client), config.workload_context()));

        let watcher = tokio::spawn(watch_runtimes(kube_client, reconciler, config));

        Ok(Self { watcher })
    }

    /// Runs until the watcher stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("CcRuntime Controller running");
        self.watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("CcRuntime watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("CcRuntime watcher error: {}", e)))
    }
}

/// Label `namespace` so the privileged agent pods are admitted.
async fn allow_privileged_pods(client: &dyn ClusterClient, namespace: &str) -> Result<(), ControllerError> {
    let labels: BTreeMap<String, String> = POD_SECURITY_LABELS
        .iter()
        .map(|key| (key.to_string(), "privileged".to_string()))
        .collect();

    client.label_namespace(namespace, &labels).await.map_err(|e| {
        error!(namespace = %namespace, error = %e, "Failed to label namespace");
        ControllerError::from(e)
    })?;
    info!(namespace = %namespace, "Namespace allows privileged pods");
    Ok(())
}
