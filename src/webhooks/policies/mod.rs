//! Validation policies for the admission webhook.
//!
//! Requests are dispatched by kind:
//! - `ResourceLimiter`: reserved namespaces, resource keys and quantities
//! - `Pod` / `Deployment` / `DaemonSet`: every container sets limits and requests
//!
//! Any other kind is allowed, as are DELETE operations.

pub mod limiter;
pub mod workload;

use kube::core::admission::Operation;
use kube::core::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;

use crate::crd::{GROUP, KIND};

/// Result of a validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation
pub struct ValidationContext<'a> {
    /// Kind of the object under admission
    pub kind: &'a GroupVersionKind,
    pub operation: Operation,
    /// The incoming object, absent for DELETE
    pub object: Option<&'a DynamicObject>,
}

/// Decode an admitted object into its typed form.
pub(crate) fn decode<T: DeserializeOwned>(object: &DynamicObject) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(object)?)
}

/// Run the policy matching the request kind
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult {
    if ctx.operation == Operation::Delete {
        return ValidationResult::allowed();
    }
    let Some(object) = ctx.object else {
        return ValidationResult::denied("InvalidRequest", "Missing object in request");
    };

    match (ctx.kind.group.as_str(), ctx.kind.kind.as_str()) {
        (GROUP, KIND) => limiter::validate(&ctx.kind.version, object),
        ("", "Pod") | ("apps", "Deployment") | ("apps", "DaemonSet") => {
            workload::validate(&ctx.kind.kind, object)
        }
        _ => ValidationResult::allowed(),
    }
}
