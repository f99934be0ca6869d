//! Uninstall branch, entered once the CcRuntime has a deletion timestamp.
//!
//! Nodes are asked to remove the runtime through the uninstall trigger label.
//! Only the nodes recorded as installed are tracked: when every one of them
//! reports uninstall-done (and the optional post-uninstall hook has finished)
//! the agent workloads are deleted, the signal labels are swept from the fleet
//! and the finalizer is released last.

use super::{AGENT_POLL, Phase, Reconciled, Reconciler, Requeue, has_finalizer};
use crate::error::ControllerError;
use crate::fleet::{FleetView, node_name};
use crate::progress::{count, record_uninstall_progress};
use crate::workload::Operation;
use cluster_client::LabelChanges;
use crds::labels::{POST_UNINSTALL_DONE, PRE_INSTALL_DONE, UNINSTALL_TRIGGER};
use crds::{CcRuntime, SignalLabel};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info};

impl Reconciler {
    pub(crate) async fn reconcile_uninstall(&self, runtime: CcRuntime) -> Result<Reconciled, ControllerError> {
        let name = runtime.name_any();
        if !has_finalizer(&runtime) {
            debug!(runtime = %name, "No finalizer, nothing to clean up");
            return Ok(Reconciled::new(Phase::TornDown, Requeue::Done));
        }

        let config = &runtime.spec.config;
        let install_done = config.install_done()?;
        let uninstall_done = config.uninstall_done()?;
        let fleet = FleetView::new(self.client.as_ref());

        self.ensure_workload(Operation::Uninstall, &runtime).await?;

        let finished = fleet.nodes_with_label(&uninstall_done).await?;
        let runtime = self
            .update_status(&runtime, |status| record_uninstall_progress(status, &finished, &uninstall_done))
            .await?;
        let status = runtime.status.clone().unwrap_or_default();
        let tracked = &status.installation_status.completed.completed_nodes_list;
        let pending = &status.un_installation_status.in_progress.nodes_list;
        let total = count(tracked);

        if !pending.is_empty() {
            let installed = fleet.nodes_with_label(&install_done).await?;
            for node in installed.iter().filter(|n| is_listed(pending, n)) {
                if UNINSTALL_TRIGGER.is_carried_by(node.metadata.labels.as_ref()) {
                    continue;
                }
                self.patch_node(node, |current| {
                    (!UNINSTALL_TRIGGER.is_carried_by(current.metadata.labels.as_ref())).then(|| {
                        LabelChanges::from([(
                            UNINSTALL_TRIGGER.key().to_string(),
                            Some(UNINSTALL_TRIGGER.value().to_string()),
                        )])
                    })
                })
                .await?;
                info!(runtime = %name, node = %node_name(node), "Triggered uninstall");
            }
            let uninstalled = status.un_installation_status.completed.completed_nodes_count;
            info!(runtime = %name, uninstalled, total, "Uninstallation in progress");
            return Ok(Reconciled::new(Phase::Uninstalling, Requeue::After(AGENT_POLL)));
        }

        if config.post_uninstall_hook().is_some() {
            self.ensure_workload(Operation::PostUninstall, &runtime).await?;
            // The hook only runs where uninstall-done is still carried; a node
            // already swept by an earlier teardown attempt has nothing left to report.
            let waiting = finished
                .iter()
                .filter(|n| is_listed(tracked, n))
                .filter(|n| !POST_UNINSTALL_DONE.is_carried_by(n.metadata.labels.as_ref()))
                .count();
            if waiting > 0 {
                info!(runtime = %name, waiting, total, "Waiting for post-uninstall hook");
                return Ok(Reconciled::new(Phase::PostUninstalling, Requeue::After(AGENT_POLL)));
            }
        }

        self.tear_down(runtime, &uninstall_done).await
    }

    /// Uninstall converged everywhere: persist status, remove agents, clean the fleet, release the record.
    async fn tear_down(&self, runtime: CcRuntime, uninstall_done: &SignalLabel) -> Result<Reconciled, ControllerError> {
        let name = runtime.name_any();
        let runtime = self
            .update_status(&runtime, |status| {
                status.un_installation_status.in_progress = Default::default();
            })
            .await?;

        for op in Operation::ALL {
            self.delete_workload(op).await?;
        }

        let tracked = runtime
            .status
            .as_ref()
            .map(|s| s.installation_status.completed.completed_nodes_list.clone())
            .unwrap_or_default();
        self.sweep_labels(&tracked, uninstall_done).await?;

        // Last write: the record disappears once released
        self.release_finalizer(&runtime).await?;
        info!(runtime = %name, "Uninstallation complete");
        Ok(Reconciled::new(Phase::TornDown, Requeue::Done))
    }

    /// Remove the controller-owned signal labels from every node still carrying them.
    ///
    /// The uninstall-done label is configurable and may be shared, so it is
    /// only removed from tracked nodes.
    async fn sweep_labels(&self, tracked: &[String], uninstall_done: &SignalLabel) -> Result<(), ControllerError> {
        let nodes = FleetView::new(self.client.as_ref()).all_nodes().await?;

        for node in &nodes {
            if sweep_changes(node, tracked, uninstall_done).is_none() {
                continue;
            }
            self.patch_node(node, |current| sweep_changes(current, tracked, uninstall_done)).await?;
            debug!(node = %node_name(node), "Swept signal labels");
        }
        Ok(())
    }
}

fn is_listed(names: &[String], node: &Node) -> bool {
    names.iter().any(|n| n == node_name(node))
}

/// Removals for every owned label `node` carries, or `None` if it carries none.
fn sweep_changes(node: &Node, tracked: &[String], uninstall_done: &SignalLabel) -> Option<LabelChanges> {
    let owned_done = is_listed(tracked, node).then_some(uninstall_done);
    let changes: LabelChanges = [&PRE_INSTALL_DONE, &POST_UNINSTALL_DONE, &UNINSTALL_TRIGGER]
        .into_iter()
        .chain(owned_done)
        .filter(|label| label.is_carried_by(node.metadata.labels.as_ref()))
        .map(|label| (label.key().to_string(), None))
        .collect();
    (!changes.is_empty()).then_some(changes)
}
