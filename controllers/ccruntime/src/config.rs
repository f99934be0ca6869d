//! Process configuration read from the environment at start-up.

use crate::error::ControllerError;
use crate::workload::WorkloadContext;
use std::time::Duration;

/// CcRuntime Controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace the agent DaemonSets are created in
    pub namespace: String,
    /// Prefix of every agent DaemonSet name
    pub name_prefix: String,
    /// Service account the agent pods run as
    pub service_account: String,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    /// Quiet period after the last event before reconciling
    pub debounce: Duration,
    /// Label the namespace so privileged agent pods are admitted
    pub label_namespace: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            name_prefix: "cc-operator".to_string(),
            service_account: "cc-operator-controller-manager".to_string(),
            concurrency: 3,
            debounce: Duration::from_secs(1),
            label_namespace: true,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let concurrency = parse_or(&lookup, "RECONCILE_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            namespace: lookup("CCRUNTIME_NAMESPACE").unwrap_or(defaults.namespace),
            name_prefix: lookup("DAEMONSET_NAME_PREFIX").unwrap_or(defaults.name_prefix),
            service_account: lookup("DAEMONSET_SERVICE_ACCOUNT").unwrap_or(defaults.service_account),
            concurrency,
            debounce: Duration::from_secs(parse_or(&lookup, "RECONCILE_DEBOUNCE_SECS", defaults.debounce.as_secs())?),
            label_namespace: parse_or(&lookup, "LABEL_NAMESPACE", defaults.label_namespace)?,
        })
    }

    pub fn workload_context(&self) -> WorkloadContext {
        WorkloadContext {
            namespace: self.namespace.clone(),
            name_prefix: self.name_prefix.clone(),
            service_account: self.service_account.clone(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}"))),
    }
}
