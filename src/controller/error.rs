//! Error types for the controller.
//!
//! Every error aborts the current pass; the controller requeues the object
//! with exponential backoff (see [`crate::controller::context::Context::backoff`]).

use thiserror::Error;

use crate::resources::quota::InvalidQuantity;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A target namespace does not exist. Namespaces are never created by the operator.
    #[error("namespace {0} for resource quota not found, please create it first")]
    NamespaceNotFound(String),

    /// A quota field could not be parsed
    #[error("invalid quota: {0}")]
    InvalidQuantity(#[from] InvalidQuantity),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Short machine-readable reason, used for events and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) if self.is_conflict() => "Conflict",
            Error::Kube(_) => "ApiError",
            Error::NamespaceNotFound(_) => "NamespaceMissing",
            Error::InvalidQuantity(_) => "InvalidQuantity",
            Error::MissingField(_) => "MissingField",
            Error::Serialization(_) => "SerializationError",
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
