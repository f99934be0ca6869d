//! CcRuntime reconciliation
//!
//! Every invocation starts from freshly read state (the CcRuntime record and
//! node labels), decides the current phase, applies the writes that phase
//! needs and returns how soon it wants to run again. Nothing is kept in
//! memory between invocations.
//!
//! - `install`: validation, pre-install hook, install rollout, convergence
//! - `uninstall`: uninstall trigger, post-uninstall hook, teardown
//! - `finalizer`: attach and release of the teardown finalizer

mod finalizer;
mod install;
mod uninstall;

#[cfg(test)]
mod install_test;

use crate::error::ControllerError;
use crate::workload::{Operation, WorkloadContext, synthesize};
use cluster_client::{ClusterClient, ClusterError, LabelChanges};
use crds::{CcRuntime, CcRuntimeStatus};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) use finalizer::has_finalizer;

/// Poll interval while a hook or the uninstall agents are running.
pub const AGENT_POLL: Duration = Duration::from_secs(10);

/// Re-reads allowed per conditional write before giving up on the invocation.
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Where a CcRuntime stands after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The record no longer exists
    Absent,
    Validating,
    PreInstalling,
    Installing,
    Converged,
    Uninstalling,
    PostUninstalling,
    TornDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// When the next invocation should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next watch event
    Done,
    /// Run again without delay
    Immediately,
    After(Duration),
}

/// Outcome of one successful invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub phase: Phase,
    pub requeue: Requeue,
}

impl Reconciled {
    fn new(phase: Phase, requeue: Requeue) -> Self {
        Self { phase, requeue }
    }
}

/// Reconciles CcRuntime resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClient + Send + Sync>,
    pub(crate) workload: WorkloadContext,
}

impl Reconciler {
    pub fn new(client: Box<dyn ClusterClient + Send + Sync>, workload: WorkloadContext) -> Self {
        Self { client, workload }
    }

    /// Drive the named CcRuntime one step towards its desired state.
    pub async fn reconcile_runtime(&self, name: &str) -> Result<Reconciled, ControllerError> {
        let Some(runtime) = self.client.get_runtime(name).await? else {
            debug!(runtime = %name, "CcRuntime not found, nothing to do");
            return Ok(Reconciled::new(Phase::Absent, Requeue::Done));
        };

        // Deletion wins over any install work
        if runtime.metadata.deletion_timestamp.is_some() {
            self.reconcile_uninstall(runtime).await
        } else {
            self.reconcile_install(runtime).await
        }
    }

    /// Create the agent DaemonSet for `op` unless it already exists. Returns true when created.
    pub(crate) async fn ensure_workload(&self, op: Operation, runtime: &CcRuntime) -> Result<bool, ControllerError> {
        let desired = synthesize(op, runtime, &self.workload)?;
        let name = self.workload.workload_name(op);

        if self.client.get_daemonset(&self.workload.namespace, &name).await?.is_some() {
            debug!(daemonset = %name, "DaemonSet already exists");
            return Ok(false);
        }

        match self.client.create_daemonset(&desired).await {
            Ok(_) => {
                info!(runtime = %runtime.name_any(), daemonset = %name, "Created {} DaemonSet", op);
                Ok(true)
            }
            Err(e) if e.is_already_exists() => {
                debug!(daemonset = %name, "DaemonSet created concurrently");
                Ok(false)
            }
            Err(e) => {
                warn!(daemonset = %name, error = %e, "Failed to create DaemonSet");
                Err(e.into())
            }
        }
    }

    /// Delete the agent DaemonSet for `op`. A missing DaemonSet is not an error.
    pub(crate) async fn delete_workload(&self, op: Operation) -> Result<(), ControllerError> {
        let name = self.workload.workload_name(op);
        match self.client.delete_daemonset(&self.workload.namespace, &name).await {
            Ok(()) => {
                info!(daemonset = %name, "Deleted DaemonSet");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `mutate` to the latest status and persist it with a conditional write.
    ///
    /// On conflict the record is re-read and the mutation re-applied to the
    /// fresh status, so concurrent progress is folded in rather than
    /// overwritten. Unchanged status is not written.
    pub(crate) async fn update_status(
        &self,
        runtime: &CcRuntime,
        mutate: impl Fn(&mut CcRuntimeStatus) + Send + Sync,
    ) -> Result<CcRuntime, ControllerError> {
        let name = runtime.name_any();
        let mut current = runtime.clone();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let mut status = current.status.clone().unwrap_or_default();
            mutate(&mut status);
            if current.status.as_ref() == Some(&status) {
                debug!(runtime = %name, "Status unchanged, skipping write");
                return Ok(current);
            }

            match self
                .client
                .patch_runtime_status(&name, current.metadata.resource_version.as_deref(), &status)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() => {
                    debug!(runtime = %name, attempt, "Status write conflicted, re-reading");
                    current = self.reread(&name).await?;
                }
                Err(e) => {
                    warn!(runtime = %name, error = %e, "Failed to update status");
                    return Err(e.into());
                }
            }
        }

        Err(ClusterError::Conflict(format!("status of CcRuntime {name} kept changing")).into())
    }

    pub(crate) async fn reread(&self, name: &str) -> Result<CcRuntime, ControllerError> {
        self.client
            .get_runtime(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound(format!("CcRuntime {name}")).into())
    }

    /// Apply the label edits `changes_for` computes for a node, re-reading it on conflict.
    ///
    /// `changes_for` returns `None` when the node needs no edit.
    pub(crate) async fn patch_node(
        &self,
        node: &Node,
        changes_for: impl Fn(&Node) -> Option<LabelChanges> + Send + Sync,
    ) -> Result<(), ControllerError> {
        let name = crate::fleet::node_name(node).to_string();
        let mut current = node.clone();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let Some(changes) = changes_for(&current) else {
                return Ok(());
            };
            match self
                .client
                .patch_node_labels(&name, current.metadata.resource_version.as_deref(), &changes)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    debug!(node = %name, attempt, "Node label write conflicted, re-reading");
                    match self.client.get_node(&name).await? {
                        Some(fresh) => current = fresh,
                        // Node left the cluster
                        None => return Ok(()),
                    }
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to update node labels");
                    return Err(e.into());
                }
            }
        }

        Err(ClusterError::Conflict(format!("labels of node {name} kept changing")).into())
    }
}
