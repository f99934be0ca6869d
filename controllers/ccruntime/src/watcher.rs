//! Kubernetes resource watchers.
//!
//! A single kube_runtime::Controller drives CcRuntime reconciliation. Besides
//! the CcRuntime objects themselves it watches:
//! - the agent DaemonSets in the target namespace, owned through their
//!   controller owner reference
//! - Nodes, mapped to every known CcRuntime, since node labels carry the
//!   agents' completion signals
//!
//! The controller stops on SIGTERM/SIGINT once in-flight reconciles finish.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::{Phase, Reconciler, Requeue};
use crds::CcRuntime;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as RuntimeConfig},
    reflector::ObjectRef,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Map a successful reconcile outcome onto the controller's next action.
pub fn to_action(requeue: Requeue) -> Action {
    match requeue {
        Requeue::Done => Action::await_change(),
        Requeue::Immediately => Action::requeue(Duration::ZERO),
        Requeue::After(delay) => Action::requeue(delay),
    }
}

async fn reconcile(runtime: Arc<CcRuntime>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let name = runtime.name_any();
    debug!(runtime = %name, "Reconciling CcRuntime");
    let outcome = ctx.reconcile_runtime(&name).await?;
    debug!(runtime = %name, phase = %outcome.phase, requeue = ?outcome.requeue, "Reconciled CcRuntime");
    Ok(to_action(outcome.requeue))
}

fn error_policy(runtime: Arc<CcRuntime>, error: &ControllerError, _ctx: Arc<Reconciler>) -> Action {
    let delay = error.requeue_after();
    if error.is_validation() {
        warn!(runtime = %runtime.name_any(), phase = %Phase::Validating, error = %error, "CcRuntime rejected, retrying in {:?}", delay);
    } else {
        error!(runtime = %runtime.name_any(), error = %error, "Reconciliation failed, retrying in {:?}", delay);
    }
    Action::requeue(delay)
}

/// Watch CcRuntimes and everything that feeds their reconciliation until shutdown.
pub async fn watch_runtimes(
    client: Client,
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
) -> Result<(), ControllerError> {
    info!(namespace = %config.namespace, "Starting CcRuntime watcher");

    let runtimes: Api<CcRuntime> = Api::all(client.clone());
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), &config.namespace);
    let nodes: Api<Node> = Api::all(client);

    let controller = Controller::new(runtimes, watcher::Config::default());
    let store = controller.store();

    // Debounce batches the bursts of node label writes a rollout produces
    let runtime_config = RuntimeConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency);

    controller
        .owns(daemonsets, watcher::Config::default())
        .watches(nodes, watcher::Config::default(), move |_node| {
            store
                .state()
                .iter()
                .map(|runtime| ObjectRef::from_obj(runtime.as_ref()))
                .collect::<Vec<_>>()
        })
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!(runtime = %obj.name, "Reconcile finished"),
                Err(e) => warn!("Controller error: {}", e),
            }
        })
        .await;

    info!("CcRuntime watcher stopped");
    Ok(())
}
