//! Workload admission policy: every container must declare resources.
//!
//! Init and ephemeral containers are not checked.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use kube::core::DynamicObject;

use super::{ValidationResult, decode};
use crate::quantity::Quantity;

/// Validate a Pod, Deployment or DaemonSet.
pub fn validate(kind: &str, object: &DynamicObject) -> ValidationResult {
    let containers = match kind {
        "Pod" => decode::<Pod>(object).map(|p| p.spec.map(|s| s.containers)),
        "Deployment" => decode::<Deployment>(object)
            .map(|d| d.spec.and_then(|s| s.template.spec).map(|s| s.containers)),
        "DaemonSet" => decode::<DaemonSet>(object)
            .map(|d| d.spec.and_then(|s| s.template.spec).map(|s| s.containers)),
        _ => return ValidationResult::allowed(),
    };
    match containers {
        Ok(containers) => {
            let name = object
                .metadata
                .name
                .as_deref()
                .or(object.metadata.generate_name.as_deref())
                .unwrap_or_default();
            validate_containers(kind, name, &containers.unwrap_or_default())
        }
        Err(e) => ValidationResult::denied("InvalidObject", &format!("cannot decode {kind}: {e}")),
    }
}

fn non_empty(map: Option<&BTreeMap<String, K8sQuantity>>) -> Option<&BTreeMap<String, K8sQuantity>> {
    map.filter(|m| !m.is_empty())
}

/// Deny when a container leaves limits or requests unset, or sets an unparseable cpu/memory value.
pub fn validate_containers(kind: &str, name: &str, containers: &[Container]) -> ValidationResult {
    for container in containers {
        let resources = container.resources.as_ref();
        let limits = non_empty(resources.and_then(|r| r.limits.as_ref()));
        let requests = non_empty(resources.and_then(|r| r.requests.as_ref()));
        let (Some(limits), Some(requests)) = (limits, requests) else {
            return ValidationResult::denied(
                "MissingResources",
                &format!(
                    "failed to validate {kind} {name}: container {} does not set resources limits or requests",
                    container.name
                ),
            );
        };

        for (section, values) in [("limits", limits), ("requests", requests)] {
            for key in ["cpu", "memory"] {
                let Some(value) = values.get(key) else {
                    continue;
                };
                if let Err(e) = Quantity::try_from(value) {
                    return ValidationResult::denied(
                        "InvalidQuantity",
                        &format!("container {}: {section}.{key}: {e}", container.name),
                    );
                }
            }
        }
    }
    ValidationResult::allowed()
}
