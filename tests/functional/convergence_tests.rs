//! Convergence of managed quotas towards the declared spec.

use resource_limiter::controller::common::FINALIZER;
use resource_limiter::controller::reconciler::PassOutcome;
use resource_limiter::controller::state_machine::LimiterPhase;
use resource_limiter::crd::{LimiterState, v1beta1, v1beta2};
use resource_limiter::resources::webhook_config::{MUTATE_LABEL, VALIDATE_LABEL};

use crate::common::fixtures::{V1beta1Builder, V1beta2Builder, example_v1beta1};
use crate::mock_state::{MockCluster, Write, hard};

#[tokio::test]
async fn test_default_target_scenario() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));

    let outcome = cluster.reconcile("limiter").await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Converged {
            phase: LimiterPhase::Applying,
            quotas: 1,
            status_changed: true,
        }
    );
    assert_eq!(
        cluster.take_writes(),
        vec![
            Write::Finalizers(vec![FINALIZER.to_string()]),
            Write::CreateQuota {
                namespace: "default".to_string(),
                name: "rl-default-0".to_string(),
            },
            Write::Status,
        ]
    );

    assert_eq!(hard(&cluster, "default", "rl-default-0", "limits.cpu"), "2");
    assert_eq!(hard(&cluster, "default", "rl-default-0", "requests.cpu"), "1");
    assert_eq!(hard(&cluster, "default", "rl-default-0", "limits.memory"), "200Mi");
    assert_eq!(hard(&cluster, "default", "rl-default-0", "requests.memory"), "150Mi");

    let status = cluster.limiter("limiter").unwrap().status.unwrap();
    assert_eq!(status.state, Some(LimiterState::Ready));
    let quota = &status.quotas["rl-default-0"];
    assert_eq!(quota.namespace, "default");
    assert_eq!(quota.cpu_limits, "0/2");
    assert_eq!(quota.cpu_requests, "0/1");
    assert_eq!(quota.mem_limits, "0/200Mi");
    assert_eq!(quota.mem_requests, "0/150Mi");
}

#[tokio::test]
async fn test_converged_pass_performs_no_writes() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));
    cluster.converge("limiter", 3).await;

    let outcome = cluster.reconcile("limiter").await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Converged {
            phase: LimiterPhase::Applying,
            quotas: 1,
            status_changed: false,
        }
    );
    assert!(cluster.take_writes().is_empty());
}

#[tokio::test]
async fn test_one_quota_per_non_reserved_target() {
    let cluster =
        MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["a", "b", "c", "kube-system"]);
    cluster.create_limiter(
        V1beta1Builder::new("limiter")
            .targets(&["a", "kube-system", "b", "c"])
            .limit("limits.cpu", "4")
            .build(),
    );

    let outcome = cluster.converge("limiter", 3).await;
    assert!(matches!(outcome, PassOutcome::Converged { quotas: 3, .. }));
    assert_eq!(
        cluster.quota_keys(),
        vec![
            ("a".to_string(), "rl-a-0".to_string()),
            ("b".to_string(), "rl-b-2".to_string()),
            ("c".to_string(), "rl-c-3".to_string()),
        ]
    );
    assert_eq!(hard(&cluster, "b", "rl-b-2", "limits.cpu"), "4");
}

#[tokio::test]
async fn test_empty_types_use_defaults() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["team-a"]);
    cluster.create_limiter(V1beta1Builder::new("limiter").targets(&["team-a"]).no_types().build());
    cluster.converge("limiter", 3).await;
    assert_eq!(hard(&cluster, "team-a", "rl-team-a-0", "limits.memory"), "200Mi");
}

#[tokio::test]
async fn test_empty_targets_stay_empty() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(V1beta1Builder::new("limiter").build());

    let outcome = cluster.converge("limiter", 3).await;
    assert!(matches!(outcome, PassOutcome::Converged { quotas: 0, .. }));
    assert!(cluster.quota_keys().is_empty());
    let status = cluster.limiter("limiter").unwrap().status.unwrap();
    assert_eq!(status.state, Some(LimiterState::Ready));
}

#[tokio::test]
async fn test_missing_namespace_is_an_error() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(V1beta1Builder::new("limiter").targets(&["default", "ghost"]).build());

    let err = cluster.reconcile("limiter").await.unwrap_err();
    assert_eq!(err.reason(), "NamespaceMissing");
    assert!(err.to_string().contains("ghost"));
    assert!(cluster.namespace("ghost").is_none());

    cluster.add_namespace("ghost");
    let outcome = cluster.converge("limiter", 3).await;
    assert!(matches!(outcome, PassOutcome::Converged { quotas: 2, .. }));
}

#[tokio::test]
async fn test_invalid_quantity_is_an_error() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(
        V1beta1Builder::new("limiter")
            .targets(&["default"])
            .limit("requests.memory", "150MB")
            .build(),
    );
    let err = cluster.reconcile("limiter").await.unwrap_err();
    assert_eq!(err.reason(), "InvalidQuantity");
    assert!(cluster.quota_keys().is_empty());
}

#[tokio::test]
async fn test_limiter_without_uid_cannot_own_quotas() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(
        V1beta1Builder::new("limiter")
            .targets(&["default"])
            .without_uid()
            .build(),
    );
    let err = cluster.reconcile("limiter").await.unwrap_err();
    assert_eq!(err.reason(), "MissingField");
}

#[tokio::test]
async fn test_spec_change_updates_quota() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));
    cluster.converge("limiter", 3).await;

    cluster.update_limiter("limiter", |rl| {
        rl.spec.types.insert("limits.cpu".to_string(), "4000m".to_string());
    });
    cluster.reconcile("limiter").await.unwrap();
    assert_eq!(
        cluster.take_writes(),
        vec![
            Write::ReplaceQuota {
                namespace: "default".to_string(),
                name: "rl-default-0".to_string(),
            },
            Write::Status,
        ]
    );
    assert_eq!(hard(&cluster, "default", "rl-default-0", "limits.cpu"), "4");
    let status = cluster.limiter("limiter").unwrap().status.unwrap();
    assert_eq!(status.quotas["rl-default-0"].cpu_limits, "0/4");
}

#[tokio::test]
async fn test_equivalent_quantities_do_not_trigger_update() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));
    cluster.converge("limiter", 3).await;

    cluster.update_limiter("limiter", |rl| {
        rl.spec.types.insert("limits.cpu".to_string(), "2000m".to_string());
    });
    cluster.reconcile("limiter").await.unwrap();
    assert!(cluster.take_writes().is_empty());
}

#[tokio::test]
async fn test_observed_usage_is_published() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));
    cluster.converge("limiter", 3).await;

    cluster.set_usage(
        "default",
        "rl-default-0",
        &[("limits.cpu", "500m"), ("requests.memory", "64Mi")],
    );
    cluster.reconcile("limiter").await.unwrap();
    assert_eq!(cluster.take_writes(), vec![Write::Status]);

    let status = cluster.limiter("limiter").unwrap().status.unwrap();
    let quota = &status.quotas["rl-default-0"];
    assert_eq!(quota.cpu_limits, "500m/2");
    assert_eq!(quota.mem_requests, "64Mi/150Mi");
    assert_eq!(quota.cpu_requests, "0/1");
}

#[tokio::test]
async fn test_removed_targets_are_pruned() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["a", "b"]);
    cluster.create_limiter(V1beta1Builder::new("limiter").targets(&["a", "b"]).build());
    cluster.converge("limiter", 3).await;

    cluster.update_limiter("limiter", |rl| {
        rl.spec.targets = vec!["b".to_string()];
    });
    cluster.converge("limiter", 3).await;

    assert_eq!(
        cluster.quota_keys(),
        vec![("b".to_string(), "rl-b-0".to_string())]
    );
    let status = cluster.limiter("limiter").unwrap().status.unwrap();
    assert_eq!(status.quotas.keys().collect::<Vec<_>>(), vec!["rl-b-0"]);
}

#[tokio::test]
async fn test_v1beta2_quotas_and_namespace_labels() {
    let cluster = MockCluster::<v1beta2::ResourceLimiter>::with_namespaces(&["team-a", "team-b"]);
    let mut partial = resource_limiter::defaults::default_quota("team-b");
    partial.cpu_limit = Some("8".to_string());
    partial.mem_limit = None;
    cluster.create_limiter(
        V1beta2Builder::new("limiter")
            .namespace("team-a")
            .quota(partial)
            .build(),
    );

    let outcome = cluster.converge("limiter", 3).await;
    assert!(matches!(outcome, PassOutcome::Converged { quotas: 2, .. }));
    assert!(cluster.quota("team-a", "rl-quota-team-a").is_some());
    // Incomplete records fall back to the defaults wholesale.
    assert_eq!(hard(&cluster, "team-b", "rl-quota-team-b", "limits.cpu"), "2");

    for ns in ["team-a", "team-b"] {
        let labels = cluster.namespace(ns).unwrap().metadata.labels.unwrap();
        assert_eq!(labels[MUTATE_LABEL], "enabled");
        assert_eq!(labels[VALIDATE_LABEL], "enabled");
    }
}

#[tokio::test]
async fn test_v1beta1_does_not_label_namespaces() {
    let cluster = MockCluster::<v1beta1::ResourceLimiter>::with_namespaces(&["default"]);
    cluster.create_limiter(example_v1beta1("limiter"));
    cluster.converge("limiter", 3).await;
    assert!(cluster.namespace("default").unwrap().metadata.labels.is_none());
}

#[tokio::test]
async fn test_absent_limiter_is_a_no_op() {
    let cluster = MockCluster::<v1beta2::ResourceLimiter>::with_namespaces(&["default"]);
    assert_eq!(cluster.reconcile("nobody").await.unwrap(), PassOutcome::Absent);
    assert!(cluster.take_writes().is_empty());
}
