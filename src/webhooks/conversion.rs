//! CRD conversion between `v1beta1` and `v1beta2`.
//!
//! v1beta1 -> v1beta2 broadcasts the flat `types` map onto one quota record
//! per target. v1beta2 -> v1beta1 collapses the records into a single map;
//! where records disagree the last present value wins, so the reverse
//! direction is lossy for heterogeneous quotas.
//!
//! A request converts all of its objects or none of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::crd::{
    LIMITS_CPU, LIMITS_MEMORY, REQUESTS_CPU, REQUESTS_MEMORY, SchemaVersion, v1beta1, v1beta2,
};

/// `apiVersion` of the ConversionReview envelope.
pub const REVIEW_API_VERSION: &str = "apiextensions.k8s.io/v1";
pub const REVIEW_KIND: &str = "ConversionReview";

/// ConversionReview as exchanged with the API server.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ConversionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ConversionResponse>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub uid: String,
    #[serde(rename = "desiredAPIVersion")]
    pub desired_api_version: String,
    #[serde(default)]
    pub objects: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub uid: String,
    #[serde(default)]
    pub converted_objects: Vec<Value>,
    pub result: ConversionStatus,
}

/// The `metav1.Status` subset the API server reads from a conversion result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConversionStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionStatus {
    pub fn success() -> Self {
        Self {
            status: "Success".to_string(),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: "Failure".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("unsupported desired API version {0:?}")]
    UnsupportedVersion(String),

    #[error("object {index} has unknown apiVersion {api_version:?}")]
    UnknownSourceVersion { index: usize, api_version: String },

    #[error("failed to decode object {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("object {index} cannot be converted to v1beta1: the quotas field is empty")]
    EmptyQuotas { index: usize },

    #[error("failed to encode converted object {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Broadcast the flat map onto one record per target.
pub fn v1beta1_to_v1beta2(src: &v1beta1::ResourceLimiter) -> v1beta2::ResourceLimiter {
    let value = |key: &str| src.spec.types.get(key).cloned();
    let quotas = src
        .spec
        .targets
        .iter()
        .map(|ns| v1beta2::ResourceLimiterQuota {
            namespace_name: ns.clone(),
            cpu_request: value(REQUESTS_CPU),
            cpu_limit: value(LIMITS_CPU),
            mem_request: value(REQUESTS_MEMORY),
            mem_limit: value(LIMITS_MEMORY),
        })
        .collect();

    v1beta2::ResourceLimiter {
        metadata: src.metadata.clone(),
        spec: v1beta2::ResourceLimiterSpec {
            quotas,
            applied: src.spec.applied,
        },
        status: src.status.clone(),
    }
}

/// Collapse the records into one target list and one map.
///
/// Returns `None` when there are no records to collapse.
pub fn v1beta2_to_v1beta1(src: &v1beta2::ResourceLimiter) -> Option<v1beta1::ResourceLimiter> {
    if src.spec.quotas.is_empty() {
        return None;
    }

    let mut spec = v1beta1::ResourceLimiterSpec {
        applied: src.spec.applied,
        ..Default::default()
    };
    for quota in &src.spec.quotas {
        spec.targets.push(quota.namespace_name.clone());
        let fields = [
            (LIMITS_CPU, &quota.cpu_limit),
            (REQUESTS_CPU, &quota.cpu_request),
            (LIMITS_MEMORY, &quota.mem_limit),
            (REQUESTS_MEMORY, &quota.mem_request),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                spec.types.insert(key.to_string(), value.clone());
            }
        }
    }

    Some(v1beta1::ResourceLimiter {
        metadata: src.metadata.clone(),
        spec,
        status: src.status.clone(),
    })
}

/// Convert one raw object. Objects already at `desired` pass through untouched.
pub fn convert_object(
    index: usize,
    object: &Value,
    desired: SchemaVersion,
) -> Result<Value, ConversionError> {
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let source = api_version
        .parse::<SchemaVersion>()
        .map_err(|_| ConversionError::UnknownSourceVersion {
            index,
            api_version: api_version.to_string(),
        })?;
    if source == desired {
        return Ok(object.clone());
    }

    let decode_err = |source| ConversionError::Decode { index, source };
    let encode_err = |source| ConversionError::Encode { index, source };
    match source {
        SchemaVersion::V1beta1 => {
            let src: v1beta1::ResourceLimiter =
                serde_json::from_value(object.clone()).map_err(decode_err)?;
            serde_json::to_value(v1beta1_to_v1beta2(&src)).map_err(encode_err)
        }
        SchemaVersion::V1beta2 => {
            let src: v1beta2::ResourceLimiter =
                serde_json::from_value(object.clone()).map_err(decode_err)?;
            let dst = v1beta2_to_v1beta1(&src).ok_or(ConversionError::EmptyQuotas { index })?;
            serde_json::to_value(dst).map_err(encode_err)
        }
    }
}

/// Convert every object to `desired_api_version`, preserving order.
pub fn convert_objects(
    desired_api_version: &str,
    objects: &[Value],
) -> Result<Vec<Value>, ConversionError> {
    let desired = desired_api_version
        .parse::<SchemaVersion>()
        .map_err(|_| ConversionError::UnsupportedVersion(desired_api_version.to_string()))?;
    objects
        .iter()
        .enumerate()
        .map(|(index, object)| convert_object(index, object, desired))
        .collect()
}

/// Answer a review. The response echoes the request uid and envelope version.
pub fn review(request_review: ConversionReview) -> ConversionReview {
    let api_version = if request_review.api_version.is_empty() {
        REVIEW_API_VERSION.to_string()
    } else {
        request_review.api_version
    };
    let response = match request_review.request {
        Some(request) => Some(respond(&request)),
        None => Some(ConversionResponse {
            result: ConversionStatus::failure("ConversionReview has no request"),
            ..Default::default()
        }),
    };
    ConversionReview {
        api_version,
        kind: REVIEW_KIND.to_string(),
        request: None,
        response,
    }
}

/// Response for a single conversion request.
pub fn respond(request: &ConversionRequest) -> ConversionResponse {
    match convert_objects(&request.desired_api_version, &request.objects) {
        Ok(converted_objects) => ConversionResponse {
            uid: request.uid.clone(),
            converted_objects,
            result: ConversionStatus::success(),
        },
        Err(e) => ConversionResponse {
            uid: request.uid.clone(),
            converted_objects: Vec::new(),
            result: ConversionStatus::failure(e.to_string()),
        },
    }
}
