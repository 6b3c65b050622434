//! `ResourceLimiter` v1beta1: one set of limits broadcast to every target namespace.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ResourceLimiterStatus;

/// ResourceLimiter applies identical quotas to a list of namespaces.
///
/// Example:
/// ```yaml
/// apiVersion: resources.resourcelimiter.io/v1beta1
/// kind: ResourceLimiter
/// metadata:
///   name: team-a
/// spec:
///   targets: ["team-a-dev", "team-a-prod"]
///   types:
///     limits.cpu: "2"
///     limits.memory: 200Mi
///     requests.cpu: "1"
///     requests.memory: 150Mi
///   applied: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "resources.resourcelimiter.io",
    version = "v1beta1",
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
    /// Namespaces receiving a quota, in order. The position of a namespace
    /// in this list is part of its quota's name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// Hard limits keyed by `limits.cpu`, `limits.memory`, `requests.cpu`
    /// and `requests.memory`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, String>,

    /// Enforce the quotas (true) or keep them declared but inactive (false).
    #[serde(default)]
    pub applied: bool,
}
