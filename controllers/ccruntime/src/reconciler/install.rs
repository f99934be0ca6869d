//! Install branch: validate, run the pre-install hook, roll the runtime out,
//! then publish RuntimeClasses and attach the teardown finalizer.

use super::{AGENT_POLL, Phase, Reconciled, Reconciler, Requeue};
use crate::error::ControllerError;
use crate::fleet::{FleetView, names_carrying};
use crate::progress::{count, record_install_progress};
use crate::workload::{Operation, runtime_class};
use crds::labels::{PRE_INSTALL_DONE, selector_string};
use crds::CcRuntime;
use kube::ResourceExt;
use tracing::{info, warn};

impl Reconciler {
    pub(crate) async fn reconcile_install(&self, runtime: CcRuntime) -> Result<Reconciled, ControllerError> {
        let name = runtime.name_any();
        let fleet = FleetView::new(self.client.as_ref());

        let selector = runtime.effective_selector();
        let eligible = fleet.eligible_nodes(&selector).await?;
        if eligible.is_empty() {
            warn!(runtime = %name, selector = %selector_string(&selector), "No nodes match the node selector");
            return Err(ControllerError::Validation(format!(
                "no nodes match ccNodeSelector {}",
                selector_string(&selector)
            )));
        }

        // Total is frozen once the first node reports install-done
        let eligible_count = count(&eligible);
        let runtime_name = runtime.spec.runtime_name;
        let runtime = self
            .update_status(&runtime, |status| {
                if !status.installation_started() {
                    status.total_nodes_count = eligible_count;
                }
                status.runtime_name = Some(runtime_name);
            })
            .await?;

        let config = &runtime.spec.config;
        if config.payload_image.is_empty() {
            warn!(runtime = %name, "payloadImage is not set");
            return Err(ControllerError::Validation("config.payloadImage must be set".to_string()));
        }
        let install_done = config.install_done()?;
        config.uninstall_done()?;

        let total = runtime.status.as_ref().map_or(eligible_count, |s| s.total_nodes_count);

        if config.pre_install_hook().is_some() {
            let prepared = count(&names_carrying(&eligible, &PRE_INSTALL_DONE).collect::<Vec<_>>());
            if prepared < total {
                self.ensure_workload(Operation::PreInstall, &runtime).await?;
                info!(runtime = %name, prepared, total, "Waiting for pre-install hook");
                return Ok(Reconciled::new(Phase::PreInstalling, Requeue::After(AGENT_POLL)));
            }
        }

        // Uninstall agent is created dormant: no node carries its trigger yet
        self.ensure_workload(Operation::Uninstall, &runtime).await?;
        self.ensure_workload(Operation::Install, &runtime).await?;

        let runtime = self
            .update_status(&runtime, |status| record_install_progress(status, &eligible, &install_done))
            .await?;
        let status = runtime.status.clone().unwrap_or_default();
        let completed = status.installation_status.completed.completed_nodes_count;
        if completed < status.total_nodes_count {
            info!(runtime = %name, completed, total = status.total_nodes_count, "Installation in progress");
            return Ok(Reconciled::new(Phase::Installing, Requeue::Immediately));
        }

        self.converge(runtime).await
    }

    /// Every node has the runtime: publish RuntimeClasses, attach the finalizer, settle status.
    async fn converge(&self, runtime: CcRuntime) -> Result<Reconciled, ControllerError> {
        let name = runtime.name_any();
        let class_names = runtime.spec.config.runtime_class_names();

        for class in &class_names {
            self.ensure_runtime_class(class, &runtime).await?;
        }

        let runtime = self.attach_finalizer(&runtime).await?;

        let joined = class_names.join(",");
        let runtime = self
            .update_status(&runtime, |status| {
                status.runtime_class.clone_from(&joined);
                status.installation_status.in_progress = Default::default();
            })
            .await?;

        let completed = runtime
            .status
            .as_ref()
            .map_or(0, |s| s.installation_status.completed.completed_nodes_count);
        info!(runtime = %name, completed, "Installation converged");
        Ok(Reconciled::new(Phase::Converged, Requeue::Done))
    }

    async fn ensure_runtime_class(&self, class: &str, runtime: &CcRuntime) -> Result<(), ControllerError> {
        if self.client.get_runtime_class(class).await?.is_some() {
            return Ok(());
        }
        match self.client.create_runtime_class(&runtime_class(class, runtime)?).await {
            Ok(_) => {
                info!(runtime = %runtime.name_any(), runtime_class = %class, "Created RuntimeClass");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
