//! Operator configuration, read from the environment at startup.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RL_CONCURRENCY` | `1` |
//! | `RL_SERVED_VERSION` | `v1beta2` |
//! | `RL_HEALTH_PORT` | `8080` |
//! | `RL_WEBHOOK_PORT` | `9443` |
//! | `RL_CONVERSION_PORT` | `9444` |
//! | `RL_WEBHOOK_CERT` | `/etc/webhook/certs/tls.crt` |
//! | `RL_WEBHOOK_KEY` | `/etc/webhook/certs/tls.key` |
//! | `POD_NAME` | hostname |
//! | `RL_WEBHOOK_SERVICE` | unset |
//! | `RL_WEBHOOK_NAMESPACE` | `default` |
//! | `RL_WEBHOOK_CA_BUNDLE` | unset |
//!
//! Webhook configurations are registered only when both
//! `RL_WEBHOOK_SERVICE` and `RL_WEBHOOK_CA_BUNDLE` are set.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::crd::SchemaVersion;
use crate::resources::webhook_config::WebhookTarget;
use crate::webhooks::{CONVERSION_PORT, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT};

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_CONCURRENCY: u16 = 1;
const DEFAULT_WEBHOOK_NAMESPACE: &str = "default";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the operator process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Maximum parallel reconciles
    pub concurrency: u16,
    /// Version the controller watches
    pub served_version: SchemaVersion,
    pub health_port: u16,
    pub webhook_port: u16,
    pub conversion_port: u16,
    pub webhook_cert: PathBuf,
    pub webhook_key: PathBuf,
    /// Event reporter instance
    pub instance: Option<String>,
    /// Service fronting the webhook servers, for self-registration
    pub webhook_service: Option<String>,
    pub webhook_namespace: String,
    /// PEM CA bundle the API server trusts the webhook with
    pub webhook_ca_bundle: Option<String>,
}

fn parse<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

impl OperatorConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let concurrency = parse("RL_CONCURRENCY", lookup("RL_CONCURRENCY"), DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "RL_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let instance = lookup("POD_NAME").filter(|v| !v.is_empty()).or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        });

        Ok(Self {
            concurrency,
            served_version: parse(
                "RL_SERVED_VERSION",
                lookup("RL_SERVED_VERSION"),
                SchemaVersion::V1beta2,
            )?,
            health_port: parse("RL_HEALTH_PORT", lookup("RL_HEALTH_PORT"), DEFAULT_HEALTH_PORT)?,
            webhook_port: parse("RL_WEBHOOK_PORT", lookup("RL_WEBHOOK_PORT"), WEBHOOK_PORT)?,
            conversion_port: parse(
                "RL_CONVERSION_PORT",
                lookup("RL_CONVERSION_PORT"),
                CONVERSION_PORT,
            )?,
            webhook_cert: lookup("RL_WEBHOOK_CERT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(WEBHOOK_CERT_PATH)),
            webhook_key: lookup("RL_WEBHOOK_KEY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(WEBHOOK_KEY_PATH)),
            instance,
            webhook_service: lookup("RL_WEBHOOK_SERVICE").filter(|v| !v.is_empty()),
            webhook_namespace: lookup("RL_WEBHOOK_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_WEBHOOK_NAMESPACE.to_string()),
            webhook_ca_bundle: lookup("RL_WEBHOOK_CA_BUNDLE").filter(|v| !v.is_empty()),
        })
    }

    /// Whether the mounted TLS material is present.
    pub fn has_webhook_certs(&self) -> bool {
        self.webhook_cert.exists() && self.webhook_key.exists()
    }

    /// Where the API server should reach the webhooks, when self-registration is enabled.
    pub fn webhook_target(&self) -> Option<WebhookTarget> {
        let service = self.webhook_service.clone()?;
        let ca_bundle = self.webhook_ca_bundle.as_ref()?;
        Some(WebhookTarget {
            service,
            namespace: self.webhook_namespace.clone(),
            ca_bundle: ca_bundle.as_bytes().to_vec(),
            admission_port: self.webhook_port,
            conversion_port: self.conversion_port,
        })
    }
}
