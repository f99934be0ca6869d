//! CcRuntime Controller
//!
//! Rolls a confidential container runtime out to the nodes selected by each
//! CcRuntime and takes it back off them when the CcRuntime is deleted:
//! - install: optional pre-install hook, payload install agent, RuntimeClasses
//! - uninstall: uninstall trigger labels, optional post-uninstall hook, cleanup
//!
//! Progress is exchanged with the per-node agents through node labels.

mod config;
mod controller;
mod error;
mod fleet;
mod progress;
mod reconciler;
mod watcher;
mod workload;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting CcRuntime Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  DaemonSet prefix: {}", config.name_prefix);
    info!("  Service account: {}", config.service_account);
    info!("  Concurrency: {}, debounce: {:?}", config.concurrency, config.debounce);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
