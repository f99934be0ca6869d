//! Agent workload synthesis
//!
//! Builds the desired DaemonSet for each agent phase and the RuntimeClass
//! objects published once a runtime is installed everywhere. Everything here
//! is a pure function of the CcRuntime: the same input always yields the same
//! object, so create-if-absent never fights over drift.

use crds::labels::UNINSTALL_TRIGGER;
use crds::{CcInstallConfig, CcRuntime, HookConfig, LabelError};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, RollingUpdateDaemonSet};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ExecAction, Lifecycle, LifecycleHandler, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, SecurityContext,
};
use k8s_openapi::api::node::v1::{RuntimeClass, Scheduling};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const DEFAULT_IMAGE_PULL_POLICY: &str = "Always";
const HOOK_SCRIPT_DIR: &str = "/opt/confidential-containers-pre-install-artifacts/scripts";

/// Agent phases, one DaemonSet each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Uninstall,
    PreInstall,
    PostUninstall,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Install,
        Operation::Uninstall,
        Operation::PreInstall,
        Operation::PostUninstall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Uninstall => "uninstall",
            Operation::PreInstall => "pre-install",
            Operation::PostUninstall => "post-uninstall",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("{0} hook is not configured")]
    HookNotConfigured(Operation),

    /// The owner reference needs both name and uid
    #[error("CcRuntime {0} has no uid yet")]
    MissingOwner(String),

    #[error(transparent)]
    Label(#[from] LabelError),
}

/// Where and as whom agent workloads run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadContext {
    pub namespace: String,
    pub name_prefix: String,
    pub service_account: String,
}

impl WorkloadContext {
    pub fn workload_name(&self, op: Operation) -> String {
        format!("{}-{}", self.name_prefix, op)
    }
}

/// Build the DaemonSet for `op`.
pub fn synthesize(op: Operation, runtime: &CcRuntime, ctx: &WorkloadContext) -> Result<DaemonSet, SynthesisError> {
    let config = &runtime.spec.config;
    let owner = owner_reference(runtime)?;

    let (container, volumes, node_selector) = match op {
        Operation::Install => (
            agent_container(op, config, &config.install_cmd, runtime),
            config.installer_volumes.clone(),
            runtime.effective_selector(),
        ),
        Operation::Uninstall => (
            agent_container(op, config, &config.uninstall_cmd, runtime),
            config.installer_volumes.clone(),
            UNINSTALL_TRIGGER.as_map(),
        ),
        Operation::PreInstall => {
            let hook = config.pre_install_hook().ok_or(SynthesisError::HookNotConfigured(op))?;
            (hook_container(op, config, hook), hook.volumes.clone(), runtime.effective_selector())
        }
        Operation::PostUninstall => {
            let hook = config
                .post_uninstall_hook()
                .ok_or(SynthesisError::HookNotConfigured(op))?;
            (hook_container(op, config, hook), hook.volumes.clone(), config.uninstall_done()?.as_map())
        }
    };

    let name = ctx.workload_name(op);
    let pod_labels = BTreeMap::from([("name".to_string(), name.clone())]);

    Ok(DaemonSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::Int(1)),
                    ..Default::default()
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(ctx.service_account.clone()),
                    node_selector: Some(node_selector),
                    containers: vec![container],
                    volumes: non_empty(volumes),
                    tolerations: runtime.spec.tolerations.clone(),
                    image_pull_secrets: config.image_pull_secret.clone().map(|secret| vec![secret]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the RuntimeClass published for `name` once install converges.
pub fn runtime_class(name: &str, runtime: &CcRuntime) -> Result<RuntimeClass, SynthesisError> {
    Ok(RuntimeClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            owner_references: Some(vec![owner_reference(runtime)?]),
            ..Default::default()
        },
        handler: name.to_string(),
        scheduling: Some(Scheduling {
            node_selector: Some(runtime.effective_selector()),
            tolerations: runtime.spec.tolerations.clone(),
        }),
        ..Default::default()
    })
}

fn owner_reference(runtime: &CcRuntime) -> Result<OwnerReference, SynthesisError> {
    runtime
        .controller_owner_ref(&())
        .ok_or_else(|| SynthesisError::MissingOwner(runtime.name_any()))
}

fn agent_container(op: Operation, config: &CcInstallConfig, command: &[String], runtime: &CcRuntime) -> Container {
    // cleanupCmd runs when an install pod is torn down
    let lifecycle = (op == Operation::Install && !config.cleanup_cmd.is_empty()).then(|| Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(config.cleanup_cmd.clone()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });

    Container {
        name: format!("cc-runtime-{op}-pod"),
        image: Some(config.payload_image.clone()),
        image_pull_policy: Some(pull_policy(config)),
        command: non_empty(command.to_vec()),
        env: Some(with_overrides(agent_env(runtime), &config.environment_variables)),
        volume_mounts: non_empty(config.installer_volume_mounts.clone()),
        lifecycle,
        security_context: Some(privileged()),
        ..Default::default()
    }
}

fn hook_container(op: Operation, config: &CcInstallConfig, hook: &HookConfig) -> Container {
    let command = if hook.cmd.is_empty() {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("{HOOK_SCRIPT_DIR}/{op}.sh"),
        ]
    } else {
        hook.cmd.clone()
    };

    Container {
        name: format!("cc-runtime-{op}-pod"),
        image: Some(hook.image.clone()),
        image_pull_policy: Some(pull_policy(config)),
        command: Some(command),
        env: Some(with_overrides(vec![node_name_env()], &hook.environment_variables)),
        volume_mounts: non_empty(hook.volume_mounts.clone()),
        security_context: Some(privileged()),
        ..Default::default()
    }
}

/// Environment the install/uninstall payload scripts read.
fn agent_env(runtime: &CcRuntime) -> Vec<EnvVar> {
    let config = &runtime.spec.config;
    let prefix = format!("{}-", runtime.spec.runtime_name.as_str());
    let shim = |class: &str| class.strip_prefix(prefix.as_str()).unwrap_or(class).to_string();

    let mut env = vec![
        node_name_env(),
        plain_env("DEBUG", config.debug.to_string()),
        plain_env(
            "SHIMS",
            config
                .runtime_classes
                .iter()
                .map(|rc| shim(&rc.name))
                .collect::<Vec<_>>()
                .join(" "),
        ),
    ];
    if let Some(default_class) = &config.default_runtime_class_name {
        env.push(plain_env("DEFAULT_SHIM", shim(default_class)));
    }

    let snapshotters = shim_mapping(config, |rc| rc.snapshotter.as_deref(), &shim);
    if !snapshotters.is_empty() {
        env.push(plain_env("SNAPSHOTTER_HANDLER_MAPPING", snapshotters));
    }
    let pull_types = shim_mapping(config, |rc| rc.pulltype.as_deref(), &shim);
    if !pull_types.is_empty() {
        env.push(plain_env("PULL_TYPE_MAPPING", pull_types));
    }

    // The controller publishes RuntimeClasses itself
    env.push(plain_env("CREATE_RUNTIMECLASSES", "false"));
    env.push(plain_env("CREATE_DEFAULT_RUNTIMECLASS", "false"));
    env.push(plain_env(
        "INSTALL_NODE_FEATURE_DISCOVERY",
        config.node_feature_discovery.to_string(),
    ));
    env
}

/// `shim:value` pairs, comma separated, for classes that set the field.
fn shim_mapping(
    config: &CcInstallConfig,
    field: impl Fn(&crds::RuntimeClassConfig) -> Option<&str>,
    shim: &impl Fn(&str) -> String,
) -> String {
    config
        .runtime_classes
        .iter()
        .filter_map(|rc| field(rc).map(|value| format!("{}:{value}", shim(&rc.name))))
        .collect::<Vec<_>>()
        .join(",")
}

/// User variables replace derived ones of the same name in place; new ones are appended.
fn with_overrides(mut env: Vec<EnvVar>, overrides: &[EnvVar]) -> Vec<EnvVar> {
    for var in overrides {
        match env.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }
    env
}

fn node_name_env() -> EnvVar {
    EnvVar {
        name: "NODE_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "spec.nodeName".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn pull_policy(config: &CcInstallConfig) -> String {
    config
        .image_pull_policy
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_PULL_POLICY.to_string())
}

fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        run_as_user: Some(0),
        ..Default::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}
