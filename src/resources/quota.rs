//! Managed `ResourceQuota` generation.
//!
//! One quota per target namespace, owned by the ResourceLimiter that declared
//! it so the garbage collector removes it together with its owner.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use thiserror::Error;

use crate::crd::{
    LIMITS_CPU, LIMITS_MEMORY, NamespaceQuotaStatus, REQUESTS_CPU, REQUESTS_MEMORY, v1beta2,
};
use crate::quantity::{Quantity, QuantityError};

/// Prefix of every managed quota name.
pub const QUOTA_PREFIX: &str = "rl";

/// Label marking quotas created by the operator.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "resource-limiter";

/// Name of the quota for the `index`-th v1beta1 target.
pub fn v1beta1_quota_name(namespace: &str, index: usize) -> String {
    format!("{QUOTA_PREFIX}-{namespace}-{index}")
}

/// Name of the quota for a v1beta2 namespace record.
pub fn v1beta2_quota_name(namespace: &str) -> String {
    format!("{QUOTA_PREFIX}-quota-{namespace}")
}

/// A quota field that failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {source}")]
pub struct InvalidQuantity {
    pub field: String,
    #[source]
    pub source: QuantityError,
}

fn parse_field(field: &str, value: Option<&str>) -> Result<Quantity, InvalidQuantity> {
    Quantity::parse(value.unwrap_or_default()).map_err(|source| InvalidQuantity {
        field: field.to_string(),
        source,
    })
}

/// Parsed hard limits for one namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaLimits {
    pub limits_cpu: Quantity,
    pub limits_memory: Quantity,
    pub requests_cpu: Quantity,
    pub requests_memory: Quantity,
}

impl QuotaLimits {
    /// Parse a v1beta1 `types` map. A missing key is reported as an empty quantity.
    pub fn from_types(types: &BTreeMap<String, String>) -> Result<Self, InvalidQuantity> {
        let get = |key: &str| parse_field(key, types.get(key).map(String::as_str));
        Ok(Self {
            limits_cpu: get(LIMITS_CPU)?,
            limits_memory: get(LIMITS_MEMORY)?,
            requests_cpu: get(REQUESTS_CPU)?,
            requests_memory: get(REQUESTS_MEMORY)?,
        })
    }

    /// Parse a v1beta2 quota record.
    pub fn from_quota(quota: &v1beta2::ResourceLimiterQuota) -> Result<Self, InvalidQuantity> {
        Ok(Self {
            limits_cpu: parse_field("cpuLimit", quota.cpu_limit.as_deref())?,
            limits_memory: parse_field("memLimit", quota.mem_limit.as_deref())?,
            requests_cpu: parse_field("cpuRequest", quota.cpu_request.as_deref())?,
            requests_memory: parse_field("memRequest", quota.mem_request.as_deref())?,
        })
    }

    /// `spec.hard` for the managed quota, in canonical form.
    pub fn hard(&self) -> BTreeMap<String, K8sQuantity> {
        self.entries()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_k8s()))
            .collect()
    }

    /// True when `hard` holds exactly these four values (compared numerically).
    pub fn matches_hard(&self, hard: Option<&BTreeMap<String, K8sQuantity>>) -> bool {
        let Some(hard) = hard else {
            return false;
        };
        hard.len() == 4
            && self.entries().into_iter().all(|(key, want)| {
                hard.get(key)
                    .and_then(|have| Quantity::try_from(have).ok())
                    .is_some_and(|have| have == want)
            })
    }

    fn entries(&self) -> [(&'static str, Quantity); 4] {
        [
            (LIMITS_CPU, self.limits_cpu),
            (LIMITS_MEMORY, self.limits_memory),
            (REQUESTS_CPU, self.requests_cpu),
            (REQUESTS_MEMORY, self.requests_memory),
        ]
    }
}

/// Build a managed quota.
pub fn generate_resource_quota(
    name: &str,
    namespace: &str,
    limits: &QuotaLimits,
    owner: OwnerReference,
) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(limits.hard()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// True when `quota` is controlled by `owner`.
pub fn is_owned_by(quota: &ResourceQuota, owner: &OwnerReference) -> bool {
    quota
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.uid == owner.uid && r.controller == Some(true))
        })
}

/// Bring an existing quota to the desired state. Returns `None` when it
/// already matches and no write is needed.
pub fn updated_resource_quota(
    existing: &ResourceQuota,
    limits: &QuotaLimits,
    owner: &OwnerReference,
) -> Option<ResourceQuota> {
    let current_hard = existing.spec.as_ref().and_then(|s| s.hard.as_ref());
    if limits.matches_hard(current_hard) && is_owned_by(existing, owner) {
        return None;
    }

    let mut updated = existing.clone();
    let spec = updated.spec.get_or_insert_with(Default::default);
    spec.hard = Some(limits.hard());

    let refs = updated.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.push(owner.clone());
    Some(updated)
}

fn used_value(used: Option<&BTreeMap<String, K8sQuantity>>, key: &str) -> String {
    match used.and_then(|u| u.get(key)) {
        Some(value) => Quantity::try_from(value)
            .map(|q| q.to_string())
            .unwrap_or_else(|_| value.0.clone()),
        None => "0".to_string(),
    }
}

/// Status record for one quota. `quota` is the stored object, or `None` for
/// a quota created in this pass (no usage observed yet).
pub fn quota_status(
    namespace: &str,
    limits: &QuotaLimits,
    quota: Option<&ResourceQuota>,
) -> NamespaceQuotaStatus {
    let used = quota
        .and_then(|q| q.status.as_ref())
        .and_then(|s| s.used.as_ref());
    let pair = |key: &str, hard: &Quantity| format!("{}/{}", used_value(used, key), hard);
    NamespaceQuotaStatus {
        namespace: namespace.to_string(),
        cpu_limits: pair(LIMITS_CPU, &limits.limits_cpu),
        cpu_requests: pair(REQUESTS_CPU, &limits.requests_cpu),
        mem_limits: pair(LIMITS_MEMORY, &limits.limits_memory),
        mem_requests: pair(REQUESTS_MEMORY, &limits.requests_memory),
    }
}
