//! Webhooks served by the operator.
//!
//! - `/mutate`: fills in missing ResourceLimiter spec fields with a JSON patch
//! - `/validate`: guards ResourceLimiter writes and workload resource declarations
//! - `/convert`: CRD conversion between `v1beta1` and `v1beta2`

pub mod codec;
pub mod conversion;
pub mod mutate;
pub mod policies;
mod server;

pub use codec::{Codecs, MediaType};
pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    CONVERSION_PORT, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookState, create_admission_router, create_conversion_router, run_admission_server,
    run_conversion_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
