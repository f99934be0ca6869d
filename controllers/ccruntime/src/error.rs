//! Controller-specific error types.
//!
//! This module defines error types specific to the CcRuntime Controller
//! that are not covered by upstream library errors, and maps each of them
//! onto the delay before the next reconcile attempt.

use crate::workload::SynthesisError;
use cluster_client::ClusterError;
use crds::LabelError;
use kube::Error as KubeError;
use std::time::Duration;
use thiserror::Error;

/// Requeue delay after a validation failure. The record may be edited to fix it.
pub const VALIDATION_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue delay after a transient platform failure.
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay after losing an optimistic concurrency race too many times.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Errors that can occur in the CcRuntime Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error from the cluster client
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// The CcRuntime cannot be acted on as written (no matching nodes, no payload image)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Malformed install/uninstall done label
    #[error("Invalid label configuration: {0}")]
    Label(#[from] LabelError),

    /// Agent workload could not be built from the CcRuntime
    #[error("Workload synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Invalid process configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when the CcRuntime itself has to change before a retry can succeed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_) | ControllerError::Label(_) | ControllerError::Synthesis(_)
        )
    }

    /// Delay before the failed reconcile is retried.
    pub fn requeue_after(&self) -> Duration {
        match self {
            e if e.is_validation() => VALIDATION_REQUEUE,
            ControllerError::Cluster(e) if e.is_conflict() => CONFLICT_REQUEUE,
            _ => TRANSIENT_REQUEUE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_after_follows_error_kind() {
        assert_eq!(
            ControllerError::Validation("no nodes".to_string()).requeue_after(),
            Duration::from_secs(15)
        );
        assert_eq!(
            ControllerError::Label(LabelError::Missing("installDoneLabel")).requeue_after(),
            Duration::from_secs(15)
        );
        assert_eq!(
            ControllerError::Cluster(ClusterError::Conflict("stale".to_string())).requeue_after(),
            Duration::from_secs(1)
        );
        let unavailable = ClusterError::Api {
            code: 503,
            reason: "ServiceUnavailable".to_string(),
            message: "etcd leader changed".to_string(),
        };
        assert_eq!(ControllerError::Cluster(unavailable).requeue_after(), Duration::from_secs(10));
    }
}
