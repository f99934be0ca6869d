//! Kubernetes access layer for the CcRuntime controller
//!
//! Wraps the handful of API calls the controller needs (CcRuntime records,
//! node labels, agent DaemonSets, RuntimeClasses and the operator namespace)
//! behind the [`ClusterClient`] trait so reconciliation logic can be tested
//! against [`MockClusterClient`].
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default().await?;
//!
//! // All worker nodes
//! let selector = BTreeMap::from([("node-role.kubernetes.io/worker".to_string(), String::new())]);
//! let nodes = client.list_nodes(&selector).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ClusterClient, LabelChanges};
pub use error::ClusterError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterClient, MockFailure, MockOperation};
