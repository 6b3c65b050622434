//! RAII namespace management for isolated tests.
//!
//! Each test creates its own namespace. ResourceLimiters are cluster-scoped,
//! so a test names its limiters after its namespace ([`TestNamespace::limiter_name`])
//! and the guard deletes every limiter carrying that prefix on drop.
//!
//! IMPORTANT: Tests using TestNamespace must use `#[tokio::test(flavor = "multi_thread")]`
//! to support synchronous cleanup via `block_in_place`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use resource_limiter::crd::v1beta2::ResourceLimiter;
use serde_json::json;
use uuid::Uuid;

/// A test namespace that is automatically deleted when dropped.
pub struct TestNamespace {
    client: Client,
    name: String,
    cleanup_initiated: AtomicBool,
}

impl TestNamespace {
    /// Create a namespace named `{prefix}-{uuid}`.
    pub async fn create(client: Client, prefix: &str) -> Self {
        let suffix = Uuid::new_v4().to_string()[..8].to_string();
        let name = format!("{prefix}-{suffix}");

        let ns_api: Api<Namespace> = Api::all(client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "integration-test".to_string(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        ns_api
            .create(&PostParams::default(), &ns)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {name}: {e}"));

        tracing::info!(namespace = %name, "Created test namespace");

        Self {
            client,
            name,
            cleanup_initiated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name for a limiter owned by this test.
    pub fn limiter_name(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.name)
    }

    /// Delete this test's limiters, stripping finalizers left behind.
    async fn delete_limiters(client: &Client, prefix: &str) {
        let api: Api<ResourceLimiter> = Api::all(client.clone());
        let limiters = match api.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                tracing::debug!("Failed to list ResourceLimiters for cleanup: {}", e);
                return;
            }
        };

        for limiter in limiters.iter().filter(|l| l.name_any().starts_with(prefix)) {
            let name = limiter.name_any();
            if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
                tracing::debug!("Failed to delete ResourceLimiter {}: {}", name, e);
            }
        }

        // Brief wait for the operator to run its cleanup
        tokio::time::sleep(Duration::from_millis(200)).await;

        let patch: Patch<serde_json::Value> =
            Patch::Merge(json!({"metadata": {"finalizers": null}}));
        for limiter in limiters.iter().filter(|l| l.name_any().starts_with(prefix)) {
            let name = limiter.name_any();
            match api.patch(&name, &PatchParams::default(), &patch).await {
                Ok(_) => tracing::debug!("Removed finalizer from ResourceLimiter {}", name),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => tracing::warn!("Failed to remove finalizer from {}: {}", name, e),
            }
        }
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        if self.cleanup_initiated.swap(true, Ordering::SeqCst) {
            return;
        }

        let name = self.name.clone();
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                Self::delete_limiters(&client, &name).await;

                let ns_api: Api<Namespace> = Api::all(client);
                let dp = DeleteParams {
                    propagation_policy: Some(kube::api::PropagationPolicy::Background),
                    ..Default::default()
                };
                match ns_api.delete(&name, &dp).await {
                    Ok(_) => tracing::debug!("Drop: namespace {} deletion initiated", name),
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => tracing::warn!("Drop: failed to delete namespace {}: {}", name, e),
                }
            });
        });
    }
}
