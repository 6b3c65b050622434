//! resource-limiter library crate
//!
//! Exports the ResourceLimiter CRDs, the quota controller, the admission and
//! conversion webhooks, and the health server used by the operator binary.

pub mod config;
pub mod controller;
pub mod crd;
pub mod defaults;
pub mod health;
pub mod quantity;
pub mod resources;
pub mod webhooks;

pub use config::OperatorConfig;
pub use health::HealthState;
pub use webhooks::{WebhookError, run_admission_server, run_conversion_server};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ResourceQuota;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use controller::context::Context;
use controller::limiter::Limiter;
use controller::reconciler::{error_policy, reconcile};

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` allows list calls to be served from the API server cache.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Run the ResourceLimiter controller for served version `L`.
///
/// Watches ResourceLimiter objects cluster-wide along with the ResourceQuotas
/// they own, so edits to a managed quota re-trigger its owner. At most
/// `concurrency` objects are reconciled in parallel; a single object is never
/// reconciled twice at once.
pub async fn run_controller<L: Limiter>(
    client: Client,
    concurrency: u16,
    instance: Option<String>,
    health_state: Option<Arc<HealthState>>,
) {
    info!(version = %L::VERSION, concurrency, "Starting ResourceLimiter controller");

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), instance, health_state));

    let limiters: Api<L> = Api::all(client.clone());
    let quotas: Api<ResourceQuota> = Api::all(client);
    let watcher_config = default_watcher_config();

    Controller::new(limiters, watcher_config.clone())
        .owns(quotas, watcher_config)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(reconcile::<L>, error_policy::<L>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Owned quota events can still arrive after their limiter was deleted.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
}
