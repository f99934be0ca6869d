//! Progress accounting
//!
//! Folds the per-node done labels observed in one invocation into the
//! CcRuntime status. Completed lists only ever grow within an attempt: a node
//! that is momentarily missing from a listing keeps its place. Counts are
//! always derived from list lengths.

use crate::fleet::{names_carrying, node_name};
use crds::{CcRuntimeStatus, SignalLabel};
use k8s_openapi::api::core::v1::Node;

/// Append every `done` name to `list`, keeping order and skipping duplicates.
pub fn fold<'n>(done: impl IntoIterator<Item = &'n str>, list: &[String]) -> Vec<String> {
    let mut folded = list.to_vec();
    for name in done {
        if !name.is_empty() && !folded.iter().any(|n| n == name) {
            folded.push(name.to_string());
        }
    }
    folded
}

pub fn count<T>(items: &[T]) -> u32 {
    u32::try_from(items.len()).unwrap_or(u32::MAX)
}

/// Fold install-done signals from the eligible snapshot. Eligible nodes not yet done are in progress.
pub fn record_install_progress(status: &mut CcRuntimeStatus, eligible: &[Node], install_done: &SignalLabel) {
    let install = &mut status.installation_status;
    install.completed.completed_nodes_list = fold(
        names_carrying(eligible, install_done),
        &install.completed.completed_nodes_list,
    );
    install.completed.completed_nodes_count = count(&install.completed.completed_nodes_list);

    install.in_progress.nodes_list = eligible
        .iter()
        .map(node_name)
        .filter(|name| !install.completed.completed_nodes_list.iter().any(|n| n.as_str() == *name))
        .map(str::to_string)
        .collect();
    install.in_progress.in_progress_nodes_count = count(&install.in_progress.nodes_list);
}

/// Fold uninstall-done signals from installed nodes only; a node outside the
/// rollout carrying the same label is ignored. Installed nodes not yet cleaned
/// up are in progress.
pub fn record_uninstall_progress(status: &mut CcRuntimeStatus, observed: &[Node], uninstall_done: &SignalLabel) {
    let installed = &status.installation_status.completed.completed_nodes_list;
    let uninstall = &mut status.un_installation_status;
    let tracked = names_carrying(observed, uninstall_done).filter(|name| installed.iter().any(|n| n == name));
    uninstall.completed.completed_nodes_list = fold(tracked, &uninstall.completed.completed_nodes_list);
    uninstall.completed.completed_nodes_count = count(&uninstall.completed.completed_nodes_list);

    uninstall.in_progress.nodes_list = installed
        .iter()
        .filter(|name| !uninstall.completed.completed_nodes_list.contains(*name))
        .cloned()
        .collect();
    uninstall.in_progress.in_progress_nodes_count = count(&uninstall.in_progress.nodes_list);
}
