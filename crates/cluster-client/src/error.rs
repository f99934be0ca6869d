//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist (404 / 410)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with an existing object of the same name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency clash: the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other API status
    #[error("Kubernetes API error ({code} {reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// Transport / client-side failure
    #[error("Kubernetes client error: {0}")]
    Kube(kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => match (ae.code, ae.reason.as_str()) {
                (404 | 410, _) => ClusterError::NotFound(ae.message),
                (409, "AlreadyExists") => ClusterError::AlreadyExists(ae.message),
                (409, _) => ClusterError::Conflict(ae.message),
                _ => ClusterError::Api {
                    code: ae.code,
                    reason: ae.reason,
                    message: ae.message,
                },
            },
            other => ClusterError::Kube(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classifies_api_errors() {
        assert!(ClusterError::from(api_error(404, "NotFound")).is_not_found());
        assert!(ClusterError::from(api_error(410, "Gone")).is_not_found());
        assert!(ClusterError::from(api_error(409, "AlreadyExists")).is_already_exists());
        assert!(ClusterError::from(api_error(409, "Conflict")).is_conflict());

        let other = ClusterError::from(api_error(503, "ServiceUnavailable"));
        assert!(!other.is_conflict() && !other.is_not_found() && !other.is_already_exists());
        assert!(matches!(other, ClusterError::Api { code: 503, .. }));
    }
}
