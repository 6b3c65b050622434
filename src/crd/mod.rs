//! Custom Resource Definitions for resource-limiter.
//!
//! `ResourceLimiter` is served in two schema versions:
//! - `v1beta1`: one flat `types` map applied to every namespace in `targets`
//! - `v1beta2`: a list of per-namespace quota records (storage version)
//!
//! Both versions share the same status shape.

pub mod v1beta1;
pub mod v1beta2;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceConversion, CustomResourceDefinition, WebhookClientConfig, WebhookConversion,
};
use kube::CustomResourceExt;
use kube::core::crd::{MergeError, merge_crds};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the custom resource.
pub const GROUP: &str = "resources.resourcelimiter.io";
/// Kind of the custom resource.
pub const KIND: &str = "ResourceLimiter";
/// Version persisted in etcd.
pub const STORAGE_VERSION: &str = "v1beta2";

/// `ResourceQuota.spec.hard` key for the CPU limit.
pub const LIMITS_CPU: &str = "limits.cpu";
/// `ResourceQuota.spec.hard` key for the memory limit.
pub const LIMITS_MEMORY: &str = "limits.memory";
/// `ResourceQuota.spec.hard` key for the CPU request.
pub const REQUESTS_CPU: &str = "requests.cpu";
/// `ResourceQuota.spec.hard` key for the memory request.
pub const REQUESTS_MEMORY: &str = "requests.memory";

/// The only keys a `v1beta1` `types` map may contain.
pub const RESOURCE_KEYS: [&str; 4] = [LIMITS_CPU, LIMITS_MEMORY, REQUESTS_CPU, REQUESTS_MEMORY];

/// Namespaces that never receive a managed quota.
pub const RESERVED_NAMESPACES: [&str; 2] = ["kube-system", "kube-public"];

/// Check whether a namespace is permanently excluded from quota management.
pub fn is_reserved_namespace(namespace: &str) -> bool {
    RESERVED_NAMESPACES.contains(&namespace)
}

/// Lifecycle state published in `status.state`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum LimiterState {
    /// Quotas are applied in every target namespace.
    Ready,
    /// `applied` is false and no managed quota remains.
    Stopped,
    /// Deletion requested, finalizer cleanup in progress.
    Terminating,
}

impl fmt::Display for LimiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterState::Ready => write!(f, "Ready"),
            LimiterState::Stopped => write!(f, "Stopped"),
            LimiterState::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Observed usage of one managed quota, each value rendered as `"<used>/<hard>"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceQuotaStatus {
    /// Namespace holding the quota.
    pub namespace: String,
    pub cpu_limits: String,
    pub cpu_requests: String,
    pub mem_limits: String,
    pub mem_requests: String,
}

/// Status shared by every served version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimiterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LimiterState>,

    /// Managed quotas keyed by quota object name.
    /// Replaced wholesale on every successful reconcile.
    #[serde(default)]
    pub quotas: BTreeMap<String, NamespaceQuotaStatus>,
}

/// A served schema version of `ResourceLimiter`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SchemaVersion {
    V1beta1,
    V1beta2,
}

impl SchemaVersion {
    /// Short version name (`v1beta1`).
    pub fn name(&self) -> &'static str {
        match self {
            SchemaVersion::V1beta1 => "v1beta1",
            SchemaVersion::V1beta2 => "v1beta2",
        }
    }

    /// Full `apiVersion` string (`resources.resourcelimiter.io/v1beta1`).
    pub fn api_version(&self) -> String {
        format!("{}/{}", GROUP, self.name())
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts either the short name or the full `apiVersion`.
impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = match s.split_once('/') {
            Some((group, version)) if group == GROUP => version,
            Some(_) => return Err(format!("unknown API group in {s:?}")),
            None => s,
        };
        match version {
            "v1beta1" => Ok(SchemaVersion::V1beta1),
            "v1beta2" => Ok(SchemaVersion::V1beta2),
            other => Err(format!("unsupported {KIND} version {other:?}")),
        }
    }
}

/// Build the multi-version CRD.
///
/// When `client_config` is set, the CRD delegates version conversion to the
/// webhook at that address.
pub fn merged_crd(
    client_config: Option<WebhookClientConfig>,
) -> Result<CustomResourceDefinition, MergeError> {
    let mut crd = merge_crds(
        vec![v1beta1::ResourceLimiter::crd(), v1beta2::ResourceLimiter::crd()],
        STORAGE_VERSION,
    )?;
    if let Some(client_config) = client_config {
        crd.spec.conversion = Some(CustomResourceConversion {
            strategy: "Webhook".to_string(),
            webhook: Some(WebhookConversion {
                client_config: Some(client_config),
                conversion_review_versions: vec!["v1".to_string()],
            }),
        });
    }
    Ok(crd)
}
