//! Teardown finalizer
//!
//! The finalizer is attached once install has converged on every node and
//! released only after uninstall has converged and the agent workloads are
//! gone. While it is present the API server keeps the CcRuntime (and the
//! objects it owns) around.

use super::{MAX_CONFLICT_RETRIES, Reconciler};
use crate::error::ControllerError;
use cluster_client::ClusterError;
use crds::{CcRuntime, RUNTIME_FINALIZER};
use kube::ResourceExt;
use tracing::{debug, info};

pub(crate) fn has_finalizer(runtime: &CcRuntime) -> bool {
    runtime.finalizers().iter().any(|f| f == RUNTIME_FINALIZER)
}

impl Reconciler {
    /// Add the finalizer if absent.
    pub(crate) async fn attach_finalizer(&self, runtime: &CcRuntime) -> Result<CcRuntime, ControllerError> {
        self.update_finalizers(runtime, |finalizers| {
            if finalizers.iter().any(|f| f == RUNTIME_FINALIZER) {
                return None;
            }
            let mut updated = finalizers.to_vec();
            updated.push(RUNTIME_FINALIZER.to_string());
            Some(updated)
        })
        .await
    }

    /// Remove the finalizer. The API server may delete the record right after.
    pub(crate) async fn release_finalizer(&self, runtime: &CcRuntime) -> Result<(), ControllerError> {
        match self
            .update_finalizers(runtime, |finalizers| {
                finalizers
                    .iter()
                    .any(|f| f == RUNTIME_FINALIZER)
                    .then(|| finalizers.iter().filter(|f| *f != RUNTIME_FINALIZER).cloned().collect())
            })
            .await
        {
            Ok(_) => Ok(()),
            // Already gone
            Err(ControllerError::Cluster(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Conditional finalizer write. `edit` returns `None` when no change is needed.
    async fn update_finalizers(
        &self,
        runtime: &CcRuntime,
        edit: impl Fn(&[String]) -> Option<Vec<String>> + Send + Sync,
    ) -> Result<CcRuntime, ControllerError> {
        let name = runtime.name_any();
        let mut current = runtime.clone();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let Some(finalizers) = edit(current.finalizers()) else {
                debug!(runtime = %name, "Finalizers already up to date");
                return Ok(current);
            };

            match self
                .client
                .patch_runtime_finalizers(&name, current.metadata.resource_version.as_deref(), &finalizers)
                .await
            {
                Ok(updated) => {
                    info!(runtime = %name, finalizers = ?finalizers, "Updated finalizers");
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => {
                    debug!(runtime = %name, attempt, "Finalizer write conflicted, re-reading");
                    current = self.reread(&name).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClusterError::Conflict(format!("finalizers of CcRuntime {name} kept changing")).into())
    }
}
