//! Unit tests for the install branch

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{AGENT_POLL, Phase, Reconciled, Requeue, has_finalizer};
    use crate::test_utils::*;
    use crate::workload::Operation;
    use cluster_client::{ClusterClient, MockFailure, MockOperation};
    use crds::labels::PRE_INSTALL_DONE;
    use std::time::Duration;

    const NAME: &str = "ccruntime-sample";

    fn mark_installed(mock: &cluster_client::MockClusterClient, nodes: &[String]) {
        for node in nodes {
            mock.set_node_label(node, INSTALL_DONE.0, INSTALL_DONE.1);
        }
    }

    #[tokio::test]
    async fn test_missing_runtime_is_a_no_op() {
        let (_mock, reconciler) = create_test_reconciler();
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome, Reconciled { phase: Phase::Absent, requeue: Requeue::Done });
    }

    #[tokio::test]
    async fn test_rollout_converges_on_three_nodes() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 3);
        mock.add_runtime(create_test_runtime(NAME));

        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Installing);
        assert_eq!(outcome.requeue, Requeue::Immediately);
        assert_eq!(
            mock.daemonset_names(),
            vec!["cc-operator-install".to_string(), "cc-operator-uninstall".to_string()]
        );
        let status = status_of(&mock, NAME);
        assert_eq!(status.total_nodes_count, 3);
        assert_eq!(status.installation_status.in_progress.in_progress_nodes_count, 3);
        assert_eq!(status.installation_status.completed.completed_nodes_count, 0);
        assert!(!has_finalizer(&mock.runtime(NAME).unwrap()));

        mark_installed(&mock, &workers);
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome, Reconciled { phase: Phase::Converged, requeue: Requeue::Done });

        let runtime = mock.runtime(NAME).unwrap();
        assert!(has_finalizer(&runtime));
        let status = runtime.status.unwrap();
        assert_eq!(status.installation_status.completed.completed_nodes_count, 3);
        assert_eq!(status.installation_status.completed.completed_nodes_list, workers);
        assert_eq!(status.installation_status.in_progress.in_progress_nodes_count, 0);
        assert!(status.installation_status.in_progress.nodes_list.is_empty());
        assert_eq!(status.runtime_class, "kata-qemu,kata-clh");
        assert_eq!(status.runtime_name, Some(crds::RuntimeName::Kata));
        assert_eq!(mock.runtime_class_names(), vec!["kata-clh".to_string(), "kata-qemu".to_string()]);
    }

    #[tokio::test]
    async fn test_converged_runtime_is_stable() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 2);
        mock.add_runtime(create_test_runtime(NAME));
        mark_installed(&mock, &workers);

        reconcile(&reconciler, NAME).await;
        let writes = mock.calls(MockOperation::PatchRuntimeStatus);
        let before = mock.runtime(NAME).unwrap();

        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Converged);
        assert_eq!(mock.calls(MockOperation::PatchRuntimeStatus), writes);
        assert_eq!(mock.calls(MockOperation::CreateDaemonSet), 2);
        assert_eq!(mock.calls(MockOperation::CreateRuntimeClass), 2);
        assert_eq!(mock.runtime(NAME).unwrap().metadata.resource_version, before.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_missing_payload_image_is_a_validation_error() {
        let (mock, reconciler) = create_test_reconciler();
        add_workers(&mock, 3);
        let mut runtime = create_test_runtime(NAME);
        runtime.spec.config.payload_image = String::new();
        mock.add_runtime(runtime);

        let err = reconciler.reconcile_runtime(NAME).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert_eq!(err.requeue_after(), Duration::from_secs(15));
        assert_eq!(status_of(&mock, NAME).total_nodes_count, 3);
        assert!(mock.daemonset_names().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_nodes_is_a_validation_error() {
        let (mock, reconciler) = create_test_reconciler();
        mock.add_node("control-plane", &[("node-role.kubernetes.io/control-plane", "")]);
        mock.add_runtime(create_test_runtime(NAME));

        let err = reconciler.reconcile_runtime(NAME).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert_eq!(err.requeue_after(), Duration::from_secs(15));
        assert!(mock.runtime(NAME).unwrap().status.is_none());
        assert_eq!(mock.calls(MockOperation::PatchRuntimeStatus), 0);
        assert!(mock.daemonset_names().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_done_label_is_rejected() {
        let (mock, reconciler) = create_test_reconciler();
        add_workers(&mock, 1);
        let mut runtime = create_test_runtime(NAME);
        runtime.spec.config.install_done_label.insert("other".to_string(), "true".to_string());
        mock.add_runtime(runtime);

        let err = reconciler.reconcile_runtime(NAME).await.unwrap_err();
        assert!(matches!(err, ControllerError::Label(_)));
        assert!(mock.daemonset_names().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_workload_is_idempotent() {
        let (mock, reconciler) = create_test_reconciler();
        let runtime = mock.add_runtime(create_test_runtime(NAME));

        assert!(reconciler.ensure_workload(Operation::Install, &runtime).await.unwrap());
        assert!(!reconciler.ensure_workload(Operation::Install, &runtime).await.unwrap());
        assert_eq!(mock.daemonset_names(), vec!["cc-operator-install".to_string()]);
        assert_eq!(mock.calls(MockOperation::CreateDaemonSet), 1);
    }

    #[tokio::test]
    async fn test_total_is_frozen_once_install_starts() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 2);
        mock.add_runtime(create_test_runtime(NAME));

        reconcile(&reconciler, NAME).await;
        assert_eq!(status_of(&mock, NAME).total_nodes_count, 2);

        // Nothing installed yet: a new node still counts
        mock.add_node("worker-2", &[WORKER]);
        reconcile(&reconciler, NAME).await;
        assert_eq!(status_of(&mock, NAME).total_nodes_count, 3);

        mark_installed(&mock, &workers[..1]);
        reconcile(&reconciler, NAME).await;
        mock.add_node("worker-3", &[WORKER]);
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Installing);
        let status = status_of(&mock, NAME);
        assert_eq!(status.total_nodes_count, 3);
        assert_eq!(status.installation_status.completed.completed_nodes_count, 1);
    }

    #[tokio::test]
    async fn test_progress_survives_across_invocations() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 3);
        mock.add_runtime(create_test_runtime(NAME));

        mark_installed(&mock, &workers[..1]);
        reconcile(&reconciler, NAME).await;

        // worker-0 briefly loses its label while worker-1 finishes
        mock.remove_node_label(&workers[0], INSTALL_DONE.0);
        mark_installed(&mock, &workers[1..2]);
        reconcile(&reconciler, NAME).await;

        let status = status_of(&mock, NAME);
        assert_eq!(
            status.installation_status.completed.completed_nodes_list,
            vec![workers[0].clone(), workers[1].clone()]
        );
        assert_eq!(status.installation_status.completed.completed_nodes_count, 2);
        assert_eq!(status.total_nodes_count, 3);
    }

    #[tokio::test]
    async fn test_status_conflict_is_retried_without_losing_progress() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 2);
        mock.add_runtime(create_test_runtime(NAME));
        mark_installed(&mock, &workers[..1]);

        mock.fail_next(MockOperation::PatchRuntimeStatus, MockFailure::Conflict);
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Installing);

        let status = status_of(&mock, NAME);
        assert_eq!(status.total_nodes_count, 2);
        assert_eq!(status.installation_status.completed.completed_nodes_list, vec![workers[0].clone()]);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_status_untouched() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 2);
        mock.add_runtime(create_test_runtime(NAME));
        reconcile(&reconciler, NAME).await;
        let before = status_of(&mock, NAME);

        mark_installed(&mock, &workers);
        mock.fail_next(MockOperation::ListNodes, MockFailure::Unavailable);
        let err = reconciler.reconcile_runtime(NAME).await.unwrap_err();
        assert_eq!(err.requeue_after(), Duration::from_secs(10));
        assert_eq!(status_of(&mock, NAME), before);
        assert!(!has_finalizer(&mock.runtime(NAME).unwrap()));
    }

    #[tokio::test]
    async fn test_existing_runtime_class_is_tolerated() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 1);
        let runtime = mock.add_runtime(create_test_runtime(NAME));
        let existing = crate::workload::runtime_class("kata-qemu", &runtime).unwrap();
        mock.create_runtime_class(&existing).await.unwrap();
        mark_installed(&mock, &workers);

        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Converged);
        assert_eq!(mock.runtime_class_names().len(), 2);
    }

    #[tokio::test]
    async fn test_pre_install_hook_gates_install() {
        let (mock, reconciler) = create_test_reconciler();
        let workers = add_workers(&mock, 2);
        let mut runtime = create_test_runtime(NAME);
        runtime.spec.config.pre_install = Some(test_hook("quay.io/confidential-containers/reqs-payload:latest"));
        mock.add_runtime(runtime);

        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome, Reconciled { phase: Phase::PreInstalling, requeue: Requeue::After(AGENT_POLL) });
        assert_eq!(mock.daemonset_names(), vec!["cc-operator-pre-install".to_string()]);

        mock.set_node_label(&workers[0], PRE_INSTALL_DONE.key(), PRE_INSTALL_DONE.value());
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::PreInstalling);

        mock.set_node_label(&workers[1], PRE_INSTALL_DONE.key(), PRE_INSTALL_DONE.value());
        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Installing);
        assert_eq!(
            mock.daemonset_names(),
            vec![
                "cc-operator-install".to_string(),
                "cc-operator-pre-install".to_string(),
                "cc-operator-uninstall".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_hook_without_image_is_skipped() {
        let (mock, reconciler) = create_test_reconciler();
        add_workers(&mock, 1);
        let mut runtime = create_test_runtime(NAME);
        runtime.spec.config.pre_install = Some(test_hook(""));
        mock.add_runtime(runtime);

        let outcome = reconcile(&reconciler, NAME).await;
        assert_eq!(outcome.phase, Phase::Installing);
        assert!(mock.daemonset("confidential-containers-system", "cc-operator-pre-install").is_none());
    }

    #[tokio::test]
    async fn test_install_workload_uses_custom_selector() {
        let (mock, reconciler) = create_test_reconciler();
        mock.add_node("tdx-0", &[("confidentialcontainers.org/tdx", "true")]);
        add_workers(&mock, 2);
        let mut runtime = create_test_runtime(NAME);
        runtime.spec.cc_node_selector = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(labels(&[("confidentialcontainers.org/tdx", "true")])),
            ..Default::default()
        });
        mock.add_runtime(runtime);

        reconcile(&reconciler, NAME).await;
        assert_eq!(status_of(&mock, NAME).total_nodes_count, 1);
        let ds = mock.daemonset("confidential-containers-system", "cc-operator-install").unwrap();
        let node_selector = ds.spec.unwrap().template.spec.unwrap().node_selector.unwrap();
        assert_eq!(node_selector, labels(&[("confidentialcontainers.org/tdx", "true")]));
    }
}
