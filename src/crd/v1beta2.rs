//! `ResourceLimiter` v1beta2: independently sized quotas per namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ResourceLimiterStatus;

/// ResourceLimiter declares one quota record per namespace.
///
/// Example:
/// ```yaml
/// apiVersion: resources.resourcelimiter.io/v1beta2
/// kind: ResourceLimiter
/// metadata:
///   name: team-a
/// spec:
///   quotas:
///     - namespaceName: team-a-dev
///       cpuLimit: "2"
///       cpuRequest: "1"
///       memLimit: 200Mi
///       memRequest: 150Mi
///   applied: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "resources.resourcelimiter.io",
    version = "v1beta2",
    kind = "ResourceLimiter",
    plural = "resourcelimiters",
    shortname = "rl",
    status = "ResourceLimiterStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Applied", "type":"boolean", "jsonPath":".spec.applied"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimiterSpec {
    /// Per-namespace quota records, processed in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotas: Vec<ResourceLimiterQuota>,

    /// Enforce the quotas (true) or keep them declared but inactive (false).
    #[serde(default)]
    pub applied: bool,
}

/// Quota for a single namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimiterQuota {
    pub namespace_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
}

impl ResourceLimiterQuota {
    /// True when all four quantities are present and non-empty.
    pub fn is_complete(&self) -> bool {
        [
            &self.cpu_request,
            &self.cpu_limit,
            &self.mem_request,
            &self.mem_limit,
        ]
        .iter()
        .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }
}
