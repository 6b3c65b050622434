//! Shared controller helpers.
//!
//! Finalizer edits are sent as JSON merge patches that carry the object's
//! `resourceVersion`, so the API server rejects them with a conflict when
//! they were computed from a stale copy.

use kube::{Api, Resource, ResourceExt, api::PatchParams};
use serde::de::DeserializeOwned;

use crate::controller::error::Error;

/// Finalizer guarding quota cleanup.
pub const FINALIZER: &str = "resources.resourcelimiter.io/finalizer";

/// Finalizer list with `finalizer` appended, or `None` when already present.
pub fn with_finalizer<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    let mut finalizers = resource.finalizers().to_vec();
    if finalizers.iter().any(|f| f == finalizer) {
        return None;
    }
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizer list with `finalizer` removed, or `None` when absent.
pub fn without_finalizer<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    let finalizers = resource.finalizers();
    if !finalizers.iter().any(|f| f == finalizer) {
        return None;
    }
    Some(
        finalizers
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect(),
    )
}

/// Merge patch replacing `metadata.finalizers`, guarded by `resource_version`.
pub fn finalizer_patch(resource_version: Option<&str>, finalizers: &[String]) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv.to_string());
    }
    serde_json::json!({ "metadata": metadata })
}

/// Replace the finalizer list of a resource with an optimistic merge patch.
pub async fn patch_finalizers<T>(
    api: &Api<T>,
    name: &str,
    resource_version: Option<&str>,
    finalizers: &[String],
) -> Result<T, Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let patch = finalizer_patch(resource_version, finalizers);
    let patched = api
        .patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    Ok(patched)
}
