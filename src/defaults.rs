//! Spec defaulting shared by the mutating webhook and the reconciler.
//!
//! Two flavours exist. Reconcile-time resolution fills in limits but never
//! invents target namespaces, so an empty `targets` list stays empty.
//! Admission-time resolution additionally supplies [`DEFAULT_TARGETS`].

use std::collections::BTreeMap;

use crate::crd::{LIMITS_CPU, LIMITS_MEMORY, REQUESTS_CPU, REQUESTS_MEMORY, v1beta1, v1beta2};

pub const DEFAULT_LIMITS_CPU: &str = "2";
pub const DEFAULT_REQUESTS_CPU: &str = "1";
pub const DEFAULT_LIMITS_MEMORY: &str = "200Mi";
pub const DEFAULT_REQUESTS_MEMORY: &str = "150Mi";

/// Namespaces targeted when an admitted object names none.
pub const DEFAULT_TARGETS: [&str; 1] = ["default"];

/// The full default `types` map.
pub fn default_types() -> BTreeMap<String, String> {
    [
        (LIMITS_CPU, DEFAULT_LIMITS_CPU),
        (LIMITS_MEMORY, DEFAULT_LIMITS_MEMORY),
        (REQUESTS_CPU, DEFAULT_REQUESTS_CPU),
        (REQUESTS_MEMORY, DEFAULT_REQUESTS_MEMORY),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// The default record for one namespace.
pub fn default_quota(namespace: &str) -> v1beta2::ResourceLimiterQuota {
    v1beta2::ResourceLimiterQuota {
        namespace_name: namespace.to_string(),
        cpu_request: Some(DEFAULT_REQUESTS_CPU.to_string()),
        cpu_limit: Some(DEFAULT_LIMITS_CPU.to_string()),
        mem_request: Some(DEFAULT_REQUESTS_MEMORY.to_string()),
        mem_limit: Some(DEFAULT_LIMITS_MEMORY.to_string()),
    }
}

fn default_target_list() -> Vec<String> {
    DEFAULT_TARGETS.iter().map(|t| t.to_string()).collect()
}

/// Reconcile-time resolution for v1beta1. An empty `types` map becomes the
/// default map; `targets` is left as written.
pub fn resolve_v1beta1(spec: &v1beta1::ResourceLimiterSpec) -> v1beta1::ResourceLimiterSpec {
    let mut resolved = spec.clone();
    if resolved.types.is_empty() {
        resolved.types = default_types();
    }
    resolved
}

/// Reconcile-time resolution for v1beta2. Any entry missing one of its four
/// quantities is replaced wholesale by the default record for its namespace.
pub fn resolve_v1beta2(spec: &v1beta2::ResourceLimiterSpec) -> v1beta2::ResourceLimiterSpec {
    let mut resolved = spec.clone();
    for quota in resolved.quotas.iter_mut() {
        if !quota.is_complete() {
            *quota = default_quota(&quota.namespace_name);
        }
    }
    resolved
}

/// Admission-time resolution for v1beta1.
pub fn admission_v1beta1(spec: &v1beta1::ResourceLimiterSpec) -> v1beta1::ResourceLimiterSpec {
    let mut resolved = resolve_v1beta1(spec);
    if resolved.targets.is_empty() {
        resolved.targets = default_target_list();
    }
    resolved
}

/// Admission-time resolution for v1beta2. An empty `quotas` list becomes one
/// default record per default target.
pub fn admission_v1beta2(spec: &v1beta2::ResourceLimiterSpec) -> v1beta2::ResourceLimiterSpec {
    let mut resolved = resolve_v1beta2(spec);
    if resolved.quotas.is_empty() {
        resolved.quotas = DEFAULT_TARGETS.iter().map(|ns| default_quota(ns)).collect();
    }
    resolved
}
