//! Defaulting for admitted ResourceLimiter objects.
//!
//! Patches are minimal: v1beta1 gets whole-field `add` operations for a
//! missing `types` map or `targets` list, v1beta2 gets one `replace` per
//! under-specified quota record (or one `add` when there are none).

use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use kube::core::{DynamicObject, GroupVersionKind};
use thiserror::Error;

use crate::crd::{GROUP, KIND, SchemaVersion, v1beta1, v1beta2};
use crate::defaults::{admission_v1beta1, admission_v1beta2};
use crate::webhooks::policies::decode;

/// Why an object could not be defaulted
#[derive(Error, Debug)]
pub enum MutationError {
    #[error("{0}")]
    UnsupportedVersion(String),

    #[error("cannot decode ResourceLimiter: {0}")]
    Decode(#[from] serde_json::Error),
}

impl MutationError {
    pub fn reason(&self) -> &'static str {
        match self {
            MutationError::UnsupportedVersion(_) => "UnsupportedVersion",
            MutationError::Decode(_) => "InvalidObject",
        }
    }
}

/// Patch for an admitted object. Kinds other than ResourceLimiter get an empty patch.
pub fn mutate(kind: &GroupVersionKind, object: &DynamicObject) -> Result<Patch, MutationError> {
    if kind.group != GROUP || kind.kind != KIND {
        return Ok(Patch(Vec::new()));
    }
    match kind
        .version
        .parse::<SchemaVersion>()
        .map_err(MutationError::UnsupportedVersion)?
    {
        SchemaVersion::V1beta1 => {
            let rl: v1beta1::ResourceLimiter = decode(object)?;
            Ok(patch_v1beta1(&rl.spec)?)
        }
        SchemaVersion::V1beta2 => {
            let rl: v1beta2::ResourceLimiter = decode(object)?;
            Ok(patch_v1beta2(&rl.spec)?)
        }
    }
}

fn add(path: PointerBuf, value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

pub fn patch_v1beta1(spec: &v1beta1::ResourceLimiterSpec) -> Result<Patch, serde_json::Error> {
    let desired = admission_v1beta1(spec);
    let mut ops = Vec::new();
    if spec.types.is_empty() {
        ops.push(add(
            PointerBuf::from_tokens(["spec", "types"]),
            serde_json::to_value(&desired.types)?,
        ));
    }
    if spec.targets.is_empty() {
        ops.push(add(
            PointerBuf::from_tokens(["spec", "targets"]),
            serde_json::to_value(&desired.targets)?,
        ));
    }
    Ok(Patch(ops))
}

pub fn patch_v1beta2(spec: &v1beta2::ResourceLimiterSpec) -> Result<Patch, serde_json::Error> {
    let desired = admission_v1beta2(spec);
    if spec.quotas.is_empty() {
        return Ok(Patch(vec![add(
            PointerBuf::from_tokens(["spec", "quotas"]),
            serde_json::to_value(&desired.quotas)?,
        )]));
    }

    let mut ops = Vec::new();
    for (index, (current, resolved)) in spec.quotas.iter().zip(&desired.quotas).enumerate() {
        if current.is_complete() {
            continue;
        }
        let index = index.to_string();
        ops.push(PatchOperation::Replace(ReplaceOperation {
            path: PointerBuf::from_tokens(["spec", "quotas", index.as_str()]),
            value: serde_json::to_value(resolved)?,
        }));
    }
    Ok(Patch(ops))
}
