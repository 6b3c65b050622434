//! Test fixtures and builder patterns for ResourceLimiter.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use resource_limiter::crd::{v1beta1, v1beta2};
use resource_limiter::defaults::{default_quota, default_types};

/// Builder for v1beta1 ResourceLimiter fixtures.
///
/// # Example
/// ```ignore
/// let limiter = V1beta1Builder::new("team-a")
///     .targets(&["team-a-dev", "team-a-prod"])
///     .applied(true)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct V1beta1Builder {
    name: String,
    targets: Vec<String>,
    types: BTreeMap<String, String>,
    applied: bool,
    uid: Option<String>,
}

impl V1beta1Builder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: Some(format!("uid-{name}")),
            name,
            targets: Vec::new(),
            types: default_types(),
            applied: true,
        }
    }

    pub fn targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Set one entry of the `types` map.
    pub fn limit(mut self, key: &str, value: &str) -> Self {
        self.types.insert(key.to_string(), value.to_string());
        self
    }

    /// Leave `types` empty so defaults apply.
    pub fn no_types(mut self) -> Self {
        self.types.clear();
        self
    }

    pub fn applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    /// Drop the UID, as for an object that was never persisted.
    pub fn without_uid(mut self) -> Self {
        self.uid = None;
        self
    }

    pub fn build(self) -> v1beta1::ResourceLimiter {
        v1beta1::ResourceLimiter {
            metadata: ObjectMeta {
                name: Some(self.name),
                uid: self.uid,
                ..Default::default()
            },
            spec: v1beta1::ResourceLimiterSpec {
                targets: self.targets,
                types: self.types,
                applied: self.applied,
            },
            status: None,
        }
    }
}

/// Builder for v1beta2 ResourceLimiter fixtures.
#[derive(Clone, Debug)]
pub struct V1beta2Builder {
    name: String,
    quotas: Vec<v1beta2::ResourceLimiterQuota>,
    applied: bool,
}

impl V1beta2Builder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quotas: Vec::new(),
            applied: true,
        }
    }

    /// Add a default quota record for `namespace`.
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.quotas.push(default_quota(namespace));
        self
    }

    pub fn quota(mut self, quota: v1beta2::ResourceLimiterQuota) -> Self {
        self.quotas.push(quota);
        self
    }

    pub fn applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    pub fn build(self) -> v1beta2::ResourceLimiter {
        v1beta2::ResourceLimiter {
            metadata: ObjectMeta {
                uid: Some(format!("uid-{}", self.name)),
                name: Some(self.name),
                ..Default::default()
            },
            spec: v1beta2::ResourceLimiterSpec {
                quotas: self.quotas,
                applied: self.applied,
            },
            status: None,
        }
    }
}

/// Limiter targeting `default` with the default limits (`2`/`1` CPU, `200Mi`/`150Mi` memory).
pub fn example_v1beta1(name: &str) -> v1beta1::ResourceLimiter {
    V1beta1Builder::new(name).targets(&["default"]).build()
}
