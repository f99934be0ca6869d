//! CcRuntime CRD Definitions
//!
//! Kubernetes custom resource for confidential container runtime rollouts and
//! the node label contract shared with the per-node payload agents.

pub mod ccruntime;
pub mod labels;

pub use ccruntime::*;
pub use labels::{
    DEFAULT_NODE_SELECTOR, LabelError, POST_UNINSTALL_DONE, PRE_INSTALL_DONE, RUNTIME_FINALIZER, SignalLabel,
    UNINSTALL_TRIGGER,
};
