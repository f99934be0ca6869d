//! Node signal labels
//!
//! Node labels are the only channel between the controller and the per-node
//! agents. Each label is a one-bit signal: agents set the "done" labels when
//! a phase finishes on their node, the controller sets the uninstall trigger
//! to start removal on a node.

use std::collections::BTreeMap;
use thiserror::Error;

/// Default node selector: every worker node.
pub const DEFAULT_NODE_SELECTOR: (&str, &str) = ("node-role.kubernetes.io/worker", "");

/// Finalizer gating deletion of a CcRuntime until uninstall has converged.
pub const RUNTIME_FINALIZER: &str = "runtimeconfig.confidentialcontainers.org/finalizer";

/// Set by the pre-install hook agent.
pub const PRE_INSTALL_DONE: SignalLabel = SignalLabel::fixed("cc-preinstall/done", "true");

/// Set by the post-uninstall hook agent.
pub const POST_UNINSTALL_DONE: SignalLabel = SignalLabel::fixed("cc-postuninstall/done", "true");

/// Set by the controller to start removal on a node.
pub const UNINSTALL_TRIGGER: SignalLabel = SignalLabel::fixed("cc-runtime/uninstall", "begin-cleanup");

/// Errors for malformed label configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} must only have one entry, found {1}")]
    TooManyEntries(&'static str, usize),
}

/// A single `key=value` node label used as a signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalLabel {
    key: std::borrow::Cow<'static, str>,
    value: std::borrow::Cow<'static, str>,
}

impl SignalLabel {
    pub const fn fixed(key: &'static str, value: &'static str) -> Self {
        Self {
            key: std::borrow::Cow::Borrowed(key),
            value: std::borrow::Cow::Borrowed(value),
        }
    }

    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: std::borrow::Cow::Owned(key.into()),
            value: std::borrow::Cow::Owned(value.into()),
        }
    }

    /// Build a label from a user supplied single-entry map.
    pub fn from_map(field: &'static str, map: &BTreeMap<String, String>) -> Result<Self, LabelError> {
        let mut entries = map.iter();
        match (entries.next(), map.len()) {
            (None, _) => Err(LabelError::Missing(field)),
            (Some((key, value)), 1) => Ok(Self::new(key.clone(), value.clone())),
            (Some(_), n) => Err(LabelError::TooManyEntries(field, n)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// True if `labels` holds this key with exactly this value.
    pub fn is_carried_by(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels
            .and_then(|l| l.get(self.key()))
            .is_some_and(|v| v == self.value())
    }

    pub fn as_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.key().to_string(), self.value().to_string())])
    }
}

/// Subset match of `match_labels` against a node's labels. An empty selector matches everything.
pub fn selector_matches(labels: Option<&BTreeMap<String, String>>, match_labels: &BTreeMap<String, String>) -> bool {
    match_labels
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v))
}

/// Render `match_labels` as an API label selector (`a=b,c=`).
pub fn selector_string(match_labels: &BTreeMap<String, String>) -> String {
    match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_from_map_requires_exactly_one_entry() {
        assert_eq!(
            SignalLabel::from_map("installDoneLabel", &BTreeMap::new()),
            Err(LabelError::Missing("installDoneLabel"))
        );
        assert_eq!(
            SignalLabel::from_map("installDoneLabel", &labels(&[("a", "1"), ("b", "2")])),
            Err(LabelError::TooManyEntries("installDoneLabel", 2))
        );
        let label = SignalLabel::from_map("installDoneLabel", &labels(&[("katacontainers.io/kata-runtime", "true")])).unwrap();
        assert_eq!(label.key(), "katacontainers.io/kata-runtime");
        assert_eq!(label.value(), "true");
    }

    #[test]
    fn test_is_carried_by_checks_value() {
        let node = labels(&[("katacontainers.io/kata-runtime", "cleanup")]);
        assert!(!SignalLabel::new("katacontainers.io/kata-runtime", "true").is_carried_by(Some(&node)));
        assert!(SignalLabel::new("katacontainers.io/kata-runtime", "cleanup").is_carried_by(Some(&node)));
        assert!(!PRE_INSTALL_DONE.is_carried_by(None));
    }

    #[test]
    fn test_selector_matches_empty_value() {
        let worker = labels(&[("node-role.kubernetes.io/worker", ""), ("kubernetes.io/os", "linux")]);
        let selector = labels(&[DEFAULT_NODE_SELECTOR]);
        assert!(selector_matches(Some(&worker), &selector));
        assert!(!selector_matches(None, &selector));
        assert!(selector_matches(None, &BTreeMap::new()));
    }

    #[test]
    fn test_selector_string() {
        let selector = labels(&[("node-role.kubernetes.io/worker", ""), ("zone", "a")]);
        assert_eq!(selector_string(&selector), "node-role.kubernetes.io/worker=,zone=a");
    }
}
