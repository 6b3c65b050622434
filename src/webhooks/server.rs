//! HTTPS servers for the admission and conversion webhooks.
//!
//! Admission (`/mutate`, `/validate`) and conversion (`/convert`) listen on
//! separate ports. Both load the same TLS key pair, mounted from a secret.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::health::HealthState;
use crate::resources::webhook_config::{CONVERT_PATH, MUTATE_PATH, VALIDATE_PATH};
use crate::webhooks::codec::Codecs;
use crate::webhooks::conversion::{
    ConversionResponse, ConversionReview, ConversionStatus, REVIEW_API_VERSION, REVIEW_KIND,
    review,
};
use crate::webhooks::mutate::mutate;
use crate::webhooks::policies::{ValidationContext, validate_all};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default admission webhook port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default conversion webhook port
pub const CONVERSION_PORT: u16 = 9444;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub codecs: Arc<Codecs>,
    pub health: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(codecs: Arc<Codecs>, health: Option<Arc<HealthState>>) -> Self {
        Self { codecs, health }
    }

    fn record_admission(&self, webhook: &str, kind: &str, allowed: bool) {
        if let Some(health) = &self.health {
            health.metrics.record_admission(webhook, kind, allowed);
        }
    }

    fn record_conversion(&self, desired_version: &str, success: bool) {
        if let Some(health) = &self.health {
            health.metrics.record_conversion(desired_version, success);
        }
    }
}

/// Errors that can occur when running a webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("webhook server error: {0}")]
    Server(String),
}

/// kube-rs deny() only sets status.message, so the reason is embedded as "[reason] message"
fn deny_with_reason(
    request: &AdmissionRequest<DynamicObject>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    AdmissionResponse::from(request)
        .deny(format!("[{reason}] {message}"))
        .into_review()
}

/// Check the envelope and extract the admission request.
///
/// Rejections are complete HTTP responses.
#[allow(clippy::result_large_err)]
fn admission_request(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<AdmissionRequest<DynamicObject>, Response> {
    if body.is_empty() {
        warn!("Admission request with empty body");
        return Err((StatusCode::BAD_REQUEST, "empty body").into_response());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != JSON_CONTENT_TYPE {
        warn!(content_type = %content_type, "Admission request with unsupported Content-Type");
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response());
    }

    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "Failed to decode AdmissionReview");
        (
            StatusCode::BAD_REQUEST,
            Json(AdmissionResponse::invalid(format!("Invalid AdmissionReview: {e}")).into_review()),
        )
            .into_response()
    })?;

    review.try_into().map_err(|e| {
        error!(error = %e, "Failed to extract admission request");
        (
            StatusCode::BAD_REQUEST,
            Json(AdmissionResponse::invalid(format!("Invalid AdmissionReview: {e}")).into_review()),
        )
            .into_response()
    })
}

/// Create the admission router
pub fn create_admission_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_handler))
        .route(VALIDATE_PATH, post(validate_handler))
        .with_state(state)
}

/// Create the conversion router
pub fn create_conversion_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(CONVERT_PATH, post(convert_handler))
        .with_state(state)
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match admission_request(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let uid = &request.uid;
    let kind = request.kind.kind.as_str();
    debug!(
        uid = %uid,
        kind = %kind,
        operation = ?request.operation,
        name = %request.name,
        "Processing validation request"
    );

    let ctx = ValidationContext {
        kind: &request.kind,
        operation: request.operation.clone(),
        object: request.object.as_ref(),
    };
    let result = validate_all(&ctx);
    state.record_admission("validate", kind, result.allowed);

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, kind = %kind, reason = %reason, message = %message, "Admission request denied");
        return Json(deny_with_reason(&request, &message, &reason)).into_response();
    }

    info!(uid = %uid, kind = %kind, "Admission request allowed");
    Json(AdmissionResponse::from(&request).into_review()).into_response()
}

async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match admission_request(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let uid = &request.uid;
    let kind = request.kind.kind.as_str();
    debug!(
        uid = %uid,
        kind = %kind,
        operation = ?request.operation,
        name = %request.name,
        "Processing mutation request"
    );

    let object = match (&request.operation, &request.object) {
        (Operation::Delete, _) | (_, None) => {
            state.record_admission("mutate", kind, true);
            return Json(AdmissionResponse::from(&request).into_review()).into_response();
        }
        (_, Some(object)) => object,
    };

    let review = match mutate(&request.kind, object) {
        Ok(patch) if patch.0.is_empty() => {
            debug!(uid = %uid, "Nothing to default");
            AdmissionResponse::from(&request).into_review()
        }
        Ok(patch) => {
            let operations = patch.0.len();
            match AdmissionResponse::from(&request).with_patch(patch) {
                Ok(response) => {
                    info!(uid = %uid, kind = %kind, operations, "Defaulted admitted object");
                    response.into_review()
                }
                Err(e) => {
                    error!(uid = %uid, error = %e, "Failed to serialize patch");
                    state.record_admission("mutate", kind, false);
                    return Json(deny_with_reason(
                        &request,
                        &format!("patch serialization error: {e}"),
                        "InternalError",
                    ))
                    .into_response();
                }
            }
        }
        Err(e) => {
            warn!(uid = %uid, kind = %kind, error = %e, "Cannot default admitted object");
            state.record_admission("mutate", kind, false);
            return Json(deny_with_reason(&request, &e.to_string(), e.reason())).into_response();
        }
    };

    state.record_admission("mutate", kind, true);
    Json(review).into_response()
}

async fn convert_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let Some(input) = state.codecs.for_content_type(content_type) else {
        let message = format!("invalid Content-Type header `{}`", content_type.unwrap_or_default());
        warn!("{message}");
        return (StatusCode::BAD_REQUEST, message).into_response();
    };

    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let Some(output) = state.codecs.negotiate(accept) else {
        let message = format!("invalid Accept header `{}`", accept.unwrap_or_default());
        warn!("{message}");
        return (StatusCode::NOT_ACCEPTABLE, message).into_response();
    };

    let reply = match state.codecs.decode::<ConversionReview>(input, &body) {
        Ok(request_review) => {
            let desired = request_review
                .request
                .as_ref()
                .map(|r| r.desired_api_version.clone())
                .unwrap_or_default();
            debug!(
                uid = ?request_review.request.as_ref().map(|r| r.uid.as_str()),
                desired_api_version = %desired,
                "Processing conversion request"
            );
            let reply = review(request_review);
            let success = reply
                .response
                .as_ref()
                .is_some_and(|r| r.result.is_success());
            if !success {
                warn!(
                    desired_api_version = %desired,
                    message = ?reply.response.as_ref().and_then(|r| r.result.message.as_deref()),
                    "Conversion failed"
                );
            }
            state.record_conversion(&desired, success);
            reply
        }
        Err(e) => {
            warn!(error = %e, "Failed to decode ConversionReview");
            state.record_conversion("", false);
            ConversionReview {
                api_version: REVIEW_API_VERSION.to_string(),
                kind: REVIEW_KIND.to_string(),
                request: None,
                response: Some(ConversionResponse {
                    result: ConversionStatus::failure(format!("failed to deserialize body: {e}")),
                    ..Default::default()
                }),
            }
        }
    };

    match state.codecs.encode(output, &reply) {
        Ok(bytes) => ([(header::CONTENT_TYPE, output.essence())], bytes).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode ConversionReview");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn serve_tls(
    app: Router,
    port: u16,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))
}

/// Serve `/mutate` and `/validate` over TLS until the listener fails.
pub async fn run_admission_server(
    state: Arc<WebhookState>,
    port: u16,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    info!(port, "Admission webhook server listening with TLS");
    serve_tls(create_admission_router(state), port, cert_path, key_path).await
}

/// Serve `/convert` over TLS until the listener fails.
pub async fn run_conversion_server(
    state: Arc<WebhookState>,
    port: u16,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    info!(port, "Conversion webhook server listening with TLS");
    serve_tls(create_conversion_router(state), port, cert_path, key_path).await
}
