//! End-to-end quota lifecycle against a real API server.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use resource_limiter::crd::LimiterState;
use resource_limiter::crd::v1beta2::ResourceLimiter;
use resource_limiter::resources::webhook_config::{MUTATE_LABEL, VALIDATE_LABEL};
use serde_json::json;

use crate::common::fixtures::V1beta2Builder;
use crate::{ScopedOperator, TestNamespace, wait_for_condition, wait_for_deletion, wait_for_state};

const TIMEOUT: Duration = Duration::from_secs(30);

async fn setup(prefix: &str) -> (Client, TestNamespace, ScopedOperator) {
    let _ = tracing_subscriber::fmt::try_init();
    let client = Client::try_default().await.unwrap();
    let ns = TestNamespace::create(client.clone(), prefix).await;
    let operator = ScopedOperator::start(client.clone()).await;
    (client, ns, operator)
}

/// A v1beta2 limiter with the default quota for `namespace`.
fn limiter(name: &str, namespace: &str) -> ResourceLimiter {
    let mut limiter = V1beta2Builder::new(name).namespace(namespace).build();
    limiter.metadata.uid = None;
    limiter
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with CRD installed"]
async fn test_limiter_creates_quota() {
    let (client, ns, operator) = setup("rl-create").await;
    let limiters: Api<ResourceLimiter> = Api::all(client.clone());
    let name = ns.limiter_name("limiter");

    limiters
        .create(&PostParams::default(), &limiter(&name, ns.name()))
        .await
        .unwrap();

    let ready = wait_for_state(&limiters, &name, LimiterState::Ready, TIMEOUT)
        .await
        .unwrap();
    let quota_name = format!("rl-quota-{}", ns.name());
    assert_eq!(ready.status.unwrap().quotas[&quota_name].cpu_limits, "0/2");

    let quotas: Api<ResourceQuota> = Api::namespaced(client.clone(), ns.name());
    let quota = quotas.get(&quota_name).await.unwrap();
    let hard: BTreeMap<_, _> = quota.spec.unwrap().hard.unwrap();
    assert_eq!(hard["limits.memory"].0, "200Mi");

    let namespaces: Api<Namespace> = Api::all(client);
    let labels = namespaces.get(ns.name()).await.unwrap().metadata.labels.unwrap();
    assert_eq!(labels[MUTATE_LABEL], "enabled");
    assert_eq!(labels[VALIDATE_LABEL], "enabled");
    assert!(operator.is_running());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with CRD installed"]
async fn test_stopping_removes_quota() {
    let (client, ns, _operator) = setup("rl-stop").await;
    let limiters: Api<ResourceLimiter> = Api::all(client.clone());
    let name = ns.limiter_name("limiter");

    limiters
        .create(&PostParams::default(), &limiter(&name, ns.name()))
        .await
        .unwrap();
    wait_for_state(&limiters, &name, LimiterState::Ready, TIMEOUT)
        .await
        .unwrap();

    limiters
        .patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({"spec": {"applied": false}})),
        )
        .await
        .unwrap();
    wait_for_state(&limiters, &name, LimiterState::Stopped, TIMEOUT)
        .await
        .unwrap();

    let quotas: Api<ResourceQuota> = Api::namespaced(client, ns.name());
    wait_for_deletion(&quotas, &format!("rl-quota-{}", ns.name()), TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster with CRD installed"]
async fn test_deletion_releases_finalizer() {
    let (client, ns, _operator) = setup("rl-delete").await;
    let limiters: Api<ResourceLimiter> = Api::all(client.clone());
    let name = ns.limiter_name("limiter");

    limiters
        .create(&PostParams::default(), &limiter(&name, ns.name()))
        .await
        .unwrap();
    wait_for_state(&limiters, &name, LimiterState::Ready, TIMEOUT)
        .await
        .unwrap();

    limiters.delete(&name, &DeleteParams::default()).await.unwrap();
    wait_for_deletion(&limiters, &name, TIMEOUT).await.unwrap();

    let quotas: Api<ResourceQuota> = Api::namespaced(client.clone(), ns.name());
    wait_for_deletion(&quotas, &format!("rl-quota-{}", ns.name()), TIMEOUT)
        .await
        .unwrap();

    let namespaces: Api<Namespace> = Api::all(client);
    let ns_obj = wait_for_condition(
        &namespaces,
        ns.name(),
        |n| {
            n.metadata
                .labels
                .as_ref()
                .is_none_or(|l| !l.contains_key(MUTATE_LABEL))
        },
        TIMEOUT,
    )
    .await
    .unwrap();
    assert!(
        ns_obj
            .metadata
            .labels
            .unwrap_or_default()
            .get(VALIDATE_LABEL)
            .is_none()
    );
}
