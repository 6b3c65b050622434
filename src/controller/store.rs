//! Cluster access used by the reconciler.
//!
//! [`ClusterStore`] is the seam between the reconcile algorithm and the API
//! server. [`KubeStore`] talks to a real cluster; the functional tests drive
//! the same algorithm against an in-memory implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;

use json_patch::{AddOperation, PatchOperation, TestOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};

use crate::controller::common::patch_finalizers;
use crate::controller::error::{Error, Result};
use crate::controller::limiter::Limiter;

/// API operations the reconciler performs.
///
/// Lookups return `Ok(None)` for objects that do not exist. Writes carry the
/// caller's `resourceVersion` where the API allows it.
pub trait ClusterStore<L: Limiter>: Send + Sync {
    fn get_limiter(&self, name: &str) -> impl Future<Output = Result<Option<L>>> + Send;

    /// Replace `metadata.finalizers` on `limiter`.
    fn patch_finalizers(
        &self,
        limiter: &L,
        finalizers: Vec<String>,
    ) -> impl Future<Output = Result<L>> + Send;

    /// Replace the whole status of `limiter` with the status it carries.
    fn replace_status(&self, limiter: &L) -> impl Future<Output = Result<L>> + Send;

    fn get_namespace(&self, name: &str) -> impl Future<Output = Result<Option<Namespace>>> + Send;

    /// Set (`Some`) or remove (`None`) namespace labels.
    fn patch_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_quota(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ResourceQuota>>> + Send;

    fn create_quota(&self, quota: &ResourceQuota) -> impl Future<Output = Result<ResourceQuota>> + Send;

    fn replace_quota(&self, quota: &ResourceQuota)
    -> impl Future<Output = Result<ResourceQuota>> + Send;

    /// Delete a quota. Returns `false` when it was already gone.
    fn delete_quota(&self, namespace: &str, name: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// [`ClusterStore`] backed by the Kubernetes API.
pub struct KubeStore<L> {
    client: Client,
    _limiter: PhantomData<fn() -> L>,
}

impl<L> KubeStore<L> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _limiter: PhantomData,
        }
    }

    fn quotas(&self, namespace: &str) -> Api<ResourceQuota> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_namespace(quota: &ResourceQuota) -> Result<String> {
    quota
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))
}

/// JSON patch replacing the whole status, rejected if the object changed since it was read.
fn status_patch<L: Limiter>(limiter: &L) -> Result<json_patch::Patch> {
    let mut ops = Vec::with_capacity(2);
    if let Some(rv) = limiter.resource_version() {
        ops.push(PatchOperation::Test(TestOperation {
            path: PointerBuf::from_tokens(["metadata", "resourceVersion"]),
            value: serde_json::Value::String(rv),
        }));
    }
    ops.push(PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["status"]),
        value: serde_json::to_value(limiter.status())?,
    }));
    Ok(json_patch::Patch(ops))
}

impl<L: Limiter> ClusterStore<L> for KubeStore<L> {
    async fn get_limiter(&self, name: &str) -> Result<Option<L>> {
        let api: Api<L> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_finalizers(&self, limiter: &L, finalizers: Vec<String>) -> Result<L> {
        let api: Api<L> = Api::all(self.client.clone());
        let rv = limiter.resource_version();
        patch_finalizers(&api, &limiter.name_any(), rv.as_deref(), &finalizers).await
    }

    async fn replace_status(&self, limiter: &L) -> Result<L> {
        let api: Api<L> = Api::all(self.client.clone());
        let patch = status_patch(limiter)?;
        Ok(api
            .patch_status(
                &limiter.name_any(),
                &PatchParams::default(),
                &Patch::<()>::Json(patch),
            )
            .await?)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_quota(&self, namespace: &str, name: &str) -> Result<Option<ResourceQuota>> {
        Ok(self.quotas(namespace).get_opt(name).await?)
    }

    async fn create_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let namespace = object_namespace(quota)?;
        Ok(self
            .quotas(&namespace)
            .create(&PostParams::default(), quota)
            .await?)
    }

    async fn replace_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let namespace = object_namespace(quota)?;
        Ok(self
            .quotas(&namespace)
            .replace(&quota.name_any(), &PostParams::default(), quota)
            .await?)
    }

    async fn delete_quota(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .quotas(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
