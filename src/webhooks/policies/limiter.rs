//! ResourceLimiter admission policy.

use kube::core::DynamicObject;

use super::{ValidationResult, decode};
use crate::crd::{RESOURCE_KEYS, SchemaVersion, is_reserved_namespace, v1beta1, v1beta2};
use crate::quantity::Quantity;

/// Validate a ResourceLimiter admitted under API version `version`.
pub fn validate(version: &str, object: &DynamicObject) -> ValidationResult {
    match version.parse::<SchemaVersion>() {
        Ok(SchemaVersion::V1beta1) => match decode::<v1beta1::ResourceLimiter>(object) {
            Ok(rl) => validate_v1beta1(&rl.spec),
            Err(e) => invalid_object(&e),
        },
        Ok(SchemaVersion::V1beta2) => match decode::<v1beta2::ResourceLimiter>(object) {
            Ok(rl) => validate_v1beta2(&rl.spec),
            Err(e) => invalid_object(&e),
        },
        Err(e) => ValidationResult::denied("UnsupportedVersion", &e),
    }
}

fn invalid_object(e: &serde_json::Error) -> ValidationResult {
    ValidationResult::denied(
        "InvalidObject",
        &format!("cannot decode ResourceLimiter: {e}"),
    )
}

fn reserved(namespace: &str) -> ValidationResult {
    ValidationResult::denied(
        "ReservedNamespace",
        &format!("namespace {namespace} is reserved and cannot carry a managed quota"),
    )
}

pub fn validate_v1beta1(spec: &v1beta1::ResourceLimiterSpec) -> ValidationResult {
    if let Some(ns) = spec.targets.iter().find(|ns| is_reserved_namespace(ns)) {
        return reserved(ns);
    }

    if let Some(key) = spec
        .types
        .keys()
        .find(|k| !RESOURCE_KEYS.contains(&k.as_str()))
    {
        return ValidationResult::denied(
            "UnknownResourceType",
            &format!(
                "unsupported resource type {key}, expected one of {}",
                RESOURCE_KEYS.join(", ")
            ),
        );
    }

    if !spec.types.is_empty()
        && let Some(key) = RESOURCE_KEYS.iter().find(|k| !spec.types.contains_key(**k))
    {
        return ValidationResult::denied(
            "MissingResourceType",
            &format!("types must set {key} when any type is set"),
        );
    }

    for (key, value) in &spec.types {
        if let Err(e) = Quantity::parse(value) {
            return ValidationResult::denied("InvalidQuantity", &format!("{key}: {e}"));
        }
    }

    ValidationResult::allowed()
}

pub fn validate_v1beta2(spec: &v1beta2::ResourceLimiterSpec) -> ValidationResult {
    for (index, quota) in spec.quotas.iter().enumerate() {
        if is_reserved_namespace(&quota.namespace_name) {
            return reserved(&quota.namespace_name);
        }
        let fields = [
            ("cpuRequest", &quota.cpu_request),
            ("cpuLimit", &quota.cpu_limit),
            ("memRequest", &quota.mem_request),
            ("memLimit", &quota.mem_limit),
        ];
        for (field, value) in fields {
            // Blank entries are replaced wholesale by the mutator.
            let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
                continue;
            };
            if let Err(e) = Quantity::parse(value) {
                return ValidationResult::denied(
                    "InvalidQuantity",
                    &format!("quotas[{index}].{field}: {e}"),
                );
            }
        }
    }
    ValidationResult::allowed()
}
