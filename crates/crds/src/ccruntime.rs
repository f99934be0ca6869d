//! CcRuntime CRD
//!
//! The declarative intent for rolling a confidential container runtime out
//! to every matching node, plus the status the controller projects back.

use crate::labels::{DEFAULT_NODE_SELECTOR, LabelError, SignalLabel};
use k8s_openapi::api::core::v1::{EnvVar, LocalObjectReference, Toleration, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "confidentialcontainers.org",
    version = "v1beta1",
    kind = "CcRuntime",
    plural = "ccruntimes",
    shortname = "ccr",
    status = "CcRuntimeStatus",
    printcolumn = r#"{"name":"Runtime","type":"string","jsonPath":".spec.runtimeName"}"#,
    printcolumn = r#"{"name":"Total","type":"integer","jsonPath":".status.totalNodesCount"}"#,
    printcolumn = r#"{"name":"Installed","type":"integer","jsonPath":".status.installationStatus.completed.completedNodesCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CcRuntimeSpec {
    /// Selects the nodes the runtime is deployed to.
    /// When absent, all worker nodes are selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_node_selector: Option<LabelSelector>,

    /// Runtime family being installed
    pub runtime_name: RuntimeName,

    /// Installation configuration
    pub config: CcInstallConfig,

    /// Tolerations applied to every agent workload and runtime class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeName {
    #[default]
    Kata,
    EnclaveCc,
}

impl RuntimeName {
    /// Wire name, also used as the runtime class prefix (`kata-qemu` -> `qemu`).
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeName::Kata => "kata",
            RuntimeName::EnclaveCc => "enclave-cc",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    /// Container image with all installation artifacts
    #[default]
    Bundle,

    /// Native OS packages (rpm/deb)
    Osnative,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CcInstallConfig {
    #[serde(default)]
    pub install_type: InstallType,

    /// Image carrying the runtime binaries, guest kernel, initrd and install scripts
    #[serde(default)]
    pub payload_image: String,

    /// Registry secret used to pull the payload image
    #[serde(default, alias = "ImagePullSecret", skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Package repository used with the `osnative` install type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_native_repo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_kernel_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_initrd_image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installer_volume_mounts: Vec<VolumeMount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installer_volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uninstall_cmd: Vec<String>,

    /// Runs as the pre-stop hook of the install container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_cmd: Vec<String>,

    /// Runtime classes created once every node has the runtime installed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_classes: Vec<RuntimeClassConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_runtime_class_name: Option<String>,

    #[serde(default)]
    pub debug: bool,

    /// Ask the payload to deploy node feature discovery alongside the runtime
    #[serde(default)]
    pub node_feature_discovery: bool,

    /// Extra environment for the install/uninstall agents. Overrides derived variables of the same name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvVar>,

    /// Label the install agent sets on a node when it is done (single entry)
    #[serde(default)]
    pub install_done_label: BTreeMap<String, String>,

    /// Label the uninstall agent sets on a node when it is done (single entry)
    #[serde(default)]
    pub uninstall_done_label: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_install: Option<HookConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_uninstall: Option<HookConfig>,
}

impl CcInstallConfig {
    pub fn install_done(&self) -> Result<SignalLabel, LabelError> {
        SignalLabel::from_map("installDoneLabel", &self.install_done_label)
    }

    pub fn uninstall_done(&self) -> Result<SignalLabel, LabelError> {
        SignalLabel::from_map("uninstallDoneLabel", &self.uninstall_done_label)
    }

    /// The pre-install hook, if one is configured (non-empty image).
    pub fn pre_install_hook(&self) -> Option<&HookConfig> {
        self.pre_install.as_ref().filter(|h| h.is_configured())
    }

    /// The post-uninstall hook, if one is configured (non-empty image).
    pub fn post_uninstall_hook(&self) -> Option<&HookConfig> {
        self.post_uninstall.as_ref().filter(|h| h.is_configured())
    }

    pub fn runtime_class_names(&self) -> Vec<String> {
        self.runtime_classes.iter().map(|rc| rc.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeClassConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshotter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulltype: Option<String>,
}

/// Pre-install / post-uninstall hook agent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default)]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl HookConfig {
    pub fn is_configured(&self) -> bool {
        !self.image.is_empty()
    }
}

impl CcRuntime {
    /// `matchLabels` of the node selector, falling back to all worker nodes.
    pub fn effective_selector(&self) -> BTreeMap<String, String> {
        self.spec
            .cc_node_selector
            .as_ref()
            .and_then(|s| s.match_labels.clone())
            .unwrap_or_else(|| {
                let (key, value) = DEFAULT_NODE_SELECTOR;
                BTreeMap::from([(key.to_string(), value.to_string())])
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CcRuntimeStatus {
    /// Comma separated runtime class names created for this runtime
    #[serde(default)]
    pub runtime_class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<RuntimeName>,

    /// Nodes targeted by this rollout. Frozen once the first node completes.
    #[serde(default)]
    pub total_nodes_count: u32,

    #[serde(default)]
    pub installation_status: InstallationStatus,

    #[serde(default)]
    pub un_installation_status: UnInstallationStatus,

    #[serde(default)]
    pub upgrade_status: UpgradeStatus,
}

impl CcRuntimeStatus {
    /// True once any node has reported the install-done signal.
    pub fn installation_started(&self) -> bool {
        !self.installation_status.completed.completed_nodes_list.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub in_progress: InstallationInProgressStatus,
    #[serde(default)]
    pub completed: CompletedStatus,
    #[serde(default)]
    pub failed: FailedStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallationInProgressStatus {
    #[serde(default)]
    pub in_progress_nodes_count: u32,
    #[serde(default, rename = "binariesInstallNodesList", skip_serializing_if = "Vec::is_empty")]
    pub nodes_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UnInstallationStatus {
    #[serde(default)]
    pub in_progress: UnInstallationInProgressStatus,
    #[serde(default)]
    pub completed: CompletedStatus,
    #[serde(default)]
    pub failed: FailedStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UnInstallationInProgressStatus {
    #[serde(default)]
    pub in_progress_nodes_count: u32,
    #[serde(default, rename = "binariesUninstallNodesList", skip_serializing_if = "Vec::is_empty")]
    pub nodes_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStatus {
    #[serde(default)]
    pub completed_nodes_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_nodes_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailedStatus {
    #[serde(default)]
    pub failed_nodes_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_nodes_list: Vec<FailedNode>,
}

/// A node whose agent reported an error
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct FailedNode {
    pub name: String,
    pub error: String,
}

/// Reserved for runtime upgrades
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[allow(clippy::empty_structs_with_brackets, reason = "serializes as {} on the wire")]
pub struct UpgradeStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_selector_defaults_to_workers() {
        let runtime = CcRuntime::new(
            "ccruntime-sample",
            CcRuntimeSpec {
                cc_node_selector: None,
                runtime_name: RuntimeName::Kata,
                config: CcInstallConfig::default(),
                tolerations: None,
            },
        );
        let selector = runtime.effective_selector();
        assert_eq!(selector.len(), 1);
        assert_eq!(selector.get("node-role.kubernetes.io/worker"), Some(&String::new()));
    }

    #[test]
    fn test_spec_deserializes_legacy_pull_secret_key() {
        let spec: CcRuntimeSpec = serde_json::from_value(serde_json::json!({
            "runtimeName": "enclave-cc",
            "config": {
                "installType": "bundle",
                "payloadImage": "quay.io/confidential-containers/runtime-payload:latest",
                "ImagePullSecret": { "name": "regcred" },
                "installDoneLabel": { "katacontainers.io/kata-runtime": "true" },
                "uninstallDoneLabel": { "katacontainers.io/kata-runtime": "cleanup" }
            }
        }))
        .unwrap();
        assert_eq!(spec.runtime_name, RuntimeName::EnclaveCc);
        assert_eq!(spec.config.image_pull_secret.as_ref().unwrap().name, "regcred");
        assert!(spec.config.pre_install_hook().is_none());
    }

    #[test]
    fn test_hook_without_image_is_not_configured() {
        let config = CcInstallConfig {
            pre_install: Some(HookConfig {
                cmd: vec!["/bin/true".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.pre_install_hook().is_none());
    }

    #[test]
    fn test_status_wire_names() {
        let mut status = CcRuntimeStatus::default();
        status.installation_status.in_progress.nodes_list = vec!["worker-0".to_string()];
        status.un_installation_status.in_progress.nodes_list = vec!["worker-1".to_string()];
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value["installationStatus"]["inProgress"]["binariesInstallNodesList"][0],
            "worker-0"
        );
        assert_eq!(
            value["unInstallationStatus"]["inProgress"]["binariesUninstallNodesList"][0],
            "worker-1"
        );
        assert!(value["upgradeStatus"].is_object());
    }
}
