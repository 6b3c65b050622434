//! Kubernetes objects managed by the operator.
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | ResourceQuota | Per-namespace hard caps owned by a ResourceLimiter |
//! | Mutating/ValidatingWebhookConfiguration | Routes admission requests to the webhook server |

pub mod quota;
pub mod webhook_config;
