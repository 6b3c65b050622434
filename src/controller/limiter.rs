//! Version-specific behaviour of the reconciler.
//!
//! The reconcile algorithm is the same for every served version of
//! `ResourceLimiter`; only naming, defaulting and namespace labelling differ.
//! [`Limiter`] captures those differences.

use std::fmt::Debug;

use k8s_openapi::ClusterResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crd::{ResourceLimiterStatus, SchemaVersion, is_reserved_namespace, v1beta1, v1beta2};
use crate::defaults::{resolve_v1beta1, resolve_v1beta2};
use crate::resources::quota::{
    InvalidQuantity, QuotaLimits, v1beta1_quota_name, v1beta2_quota_name,
};

/// A managed quota identified by name and namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaTarget {
    pub name: String,
    pub namespace: String,
}

/// A quota the reconciler should converge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredQuota {
    pub target: QuotaTarget,
    pub limits: QuotaLimits,
}

/// A served version of `ResourceLimiter`.
pub trait Limiter:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Schema version this type represents.
    const VERSION: SchemaVersion;

    /// Whether the quotas should be enforced.
    fn applied(&self) -> bool;

    /// Every quota this object names, reserved namespaces excluded, in spec order.
    fn quota_targets(&self) -> Vec<QuotaTarget>;

    /// Resolve defaults and parse limits for every target.
    fn desired_quotas(&self) -> Result<Vec<DesiredQuota>, InvalidQuantity>;

    /// Whether target namespaces carry the webhook-enablement labels.
    fn labels_namespaces(&self) -> bool {
        Self::VERSION == SchemaVersion::V1beta2
    }

    fn status(&self) -> Option<&ResourceLimiterStatus>;

    fn status_mut(&mut self) -> &mut Option<ResourceLimiterStatus>;
}

impl Limiter for v1beta1::ResourceLimiter {
    const VERSION: SchemaVersion = SchemaVersion::V1beta1;

    fn applied(&self) -> bool {
        self.spec.applied
    }

    fn quota_targets(&self) -> Vec<QuotaTarget> {
        self.spec
            .targets
            .iter()
            .enumerate()
            .filter(|(_, ns)| !is_reserved_namespace(ns))
            .map(|(index, ns)| QuotaTarget {
                name: v1beta1_quota_name(ns, index),
                namespace: ns.clone(),
            })
            .collect()
    }

    fn desired_quotas(&self) -> Result<Vec<DesiredQuota>, InvalidQuantity> {
        let resolved = resolve_v1beta1(&self.spec);
        let targets = self.quota_targets();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let limits = QuotaLimits::from_types(&resolved.types)?;
        Ok(targets
            .into_iter()
            .map(|target| DesiredQuota {
                target,
                limits: limits.clone(),
            })
            .collect())
    }

    fn status(&self) -> Option<&ResourceLimiterStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<ResourceLimiterStatus> {
        &mut self.status
    }
}

impl Limiter for v1beta2::ResourceLimiter {
    const VERSION: SchemaVersion = SchemaVersion::V1beta2;

    fn applied(&self) -> bool {
        self.spec.applied
    }

    fn quota_targets(&self) -> Vec<QuotaTarget> {
        self.spec
            .quotas
            .iter()
            .filter(|q| !is_reserved_namespace(&q.namespace_name))
            .map(|q| QuotaTarget {
                name: v1beta2_quota_name(&q.namespace_name),
                namespace: q.namespace_name.clone(),
            })
            .collect()
    }

    fn desired_quotas(&self) -> Result<Vec<DesiredQuota>, InvalidQuantity> {
        resolve_v1beta2(&self.spec)
            .quotas
            .iter()
            .filter(|q| !is_reserved_namespace(&q.namespace_name))
            .map(|q| {
                Ok(DesiredQuota {
                    target: QuotaTarget {
                        name: v1beta2_quota_name(&q.namespace_name),
                        namespace: q.namespace_name.clone(),
                    },
                    limits: QuotaLimits::from_quota(q)?,
                })
            })
            .collect()
    }

    fn status(&self) -> Option<&ResourceLimiterStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<ResourceLimiterStatus> {
        &mut self.status
    }
}
