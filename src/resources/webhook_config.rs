//! Admission and conversion webhook registration.
//!
//! Namespaces opt into the admission webhooks through the labels in
//! [`NAMESPACE_LABELS`]; the reconciler sets them on v1beta2 target
//! namespaces and strips them on cleanup.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::ByteString;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiext;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Patch, PatchParams};
use kube::core::crd::MergeError;
use kube::{Api, Client};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use crate::controller::context::FIELD_MANAGER;
use crate::crd::{GROUP, merged_crd};

/// Namespace label enabling the mutating webhook.
pub const MUTATE_LABEL: &str = "resourcelimiter-mutate";
/// Namespace label enabling the validating webhook.
pub const VALIDATE_LABEL: &str = "resourcelimiter-validate";
pub const LABEL_ENABLED: &str = "enabled";

/// Labels set on every v1beta2 target namespace.
pub const NAMESPACE_LABELS: [(&str, &str); 2] =
    [(MUTATE_LABEL, LABEL_ENABLED), (VALIDATE_LABEL, LABEL_ENABLED)];

pub const MUTATING_CONFIG_NAME: &str = "resourcelimiter-checker-mutate";
pub const VALIDATING_CONFIG_NAME: &str = "resourcelimiter-checker-validate";
pub const MUTATING_WEBHOOK_NAME: &str = "resourcelimiter.mutate.cliufreever.io";
pub const VALIDATING_WEBHOOK_NAME: &str = "resourcelimiter.validate.cliufreever.io";

pub const MUTATE_PATH: &str = "/mutate";
pub const VALIDATE_PATH: &str = "/validate";
pub const CONVERT_PATH: &str = "/convert";

/// Failure registering webhooks with the API server
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("CRD merge failed: {0}")]
    Crd(#[from] MergeError),
}

/// Where the API server reaches the webhook servers.
#[derive(Clone, Debug)]
pub struct WebhookTarget {
    pub service: String,
    pub namespace: String,
    /// PEM bundle of the CA that signed the serving certificate
    pub ca_bundle: Vec<u8>,
    pub admission_port: u16,
    pub conversion_port: u16,
}

impl WebhookTarget {
    fn client_config(&self, path: &str) -> WebhookClientConfig {
        WebhookClientConfig {
            service: Some(ServiceReference {
                name: self.service.clone(),
                namespace: self.namespace.clone(),
                path: Some(path.to_string()),
                port: Some(i32::from(self.admission_port)),
            }),
            ca_bundle: Some(ByteString(self.ca_bundle.clone())),
            url: None,
        }
    }

    /// Client config for the CRD conversion webhook.
    pub fn conversion_client_config(&self) -> apiext::WebhookClientConfig {
        apiext::WebhookClientConfig {
            service: Some(apiext::ServiceReference {
                name: self.service.clone(),
                namespace: self.namespace.clone(),
                path: Some(CONVERT_PATH.to_string()),
                port: Some(i32::from(self.conversion_port)),
            }),
            ca_bundle: Some(ByteString(self.ca_bundle.clone())),
            url: None,
        }
    }
}

fn rule(group: &str, versions: &[&str], resource: &str) -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
        api_groups: Some(vec![group.to_string()]),
        api_versions: Some(versions.iter().map(|v| v.to_string()).collect()),
        resources: Some(vec![resource.to_string()]),
        scope: None,
    }
}

fn limiter_rule() -> RuleWithOperations {
    rule(GROUP, &["v1beta1", "v1beta2"], "resourcelimiters")
}

fn selector(label: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            label.to_string(),
            LABEL_ENABLED.to_string(),
        )])),
        ..Default::default()
    }
}

fn review_versions() -> Vec<String> {
    vec!["v1".to_string(), "v1beta1".to_string()]
}

/// Mutating configuration: defaults ResourceLimiter writes.
pub fn mutating_webhook_configuration(target: &WebhookTarget) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(MUTATING_CONFIG_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: MUTATING_WEBHOOK_NAME.to_string(),
            admission_review_versions: review_versions(),
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            client_config: target.client_config(MUTATE_PATH),
            rules: Some(vec![limiter_rule()]),
            namespace_selector: Some(selector(MUTATE_LABEL)),
            ..Default::default()
        }]),
    }
}

/// Validating configuration: ResourceLimiter plus workloads in labelled namespaces.
pub fn validating_webhook_configuration(target: &WebhookTarget) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(VALIDATING_CONFIG_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: VALIDATING_WEBHOOK_NAME.to_string(),
            admission_review_versions: review_versions(),
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            client_config: target.client_config(VALIDATE_PATH),
            rules: Some(vec![
                limiter_rule(),
                rule("", &["v1"], "pods"),
                rule("apps", &["v1"], "deployments"),
                rule("apps", &["v1"], "daemonsets"),
            ]),
            namespace_selector: Some(selector(VALIDATE_LABEL)),
            ..Default::default()
        }]),
    }
}

/// Server-side apply both admission configurations and the CRD with its conversion webhook.
pub async fn apply_webhook_configurations(
    client: &Client,
    target: &WebhookTarget,
) -> Result<(), RegistrationError> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    mutating
        .patch(
            MUTATING_CONFIG_NAME,
            &params,
            &Patch::Apply(&mutating_webhook_configuration(target)),
        )
        .await?;

    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    validating
        .patch(
            VALIDATING_CONFIG_NAME,
            &params,
            &Patch::Apply(&validating_webhook_configuration(target)),
        )
        .await?;

    let crd = merged_crd(Some(target.conversion_client_config()))?;
    let crds: Api<apiext::CustomResourceDefinition> = Api::all(client.clone());
    if let Some(name) = crd.metadata.name.clone() {
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    info!(
        service = %target.service,
        namespace = %target.namespace,
        "Webhook configuration installed"
    );
    Ok(())
}
