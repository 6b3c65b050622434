//! resource-limiter - enforces per-namespace CPU/memory quotas declared by
//! ResourceLimiter custom resources.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration from the environment
//! - Starts the health server, the controller for the served version, and the
//!   admission and conversion webhook servers when TLS material is mounted

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use resource_limiter::crd::{SchemaVersion, v1beta1, v1beta2};
use resource_limiter::health::{HealthState, run_health_server};
use resource_limiter::resources::webhook_config::apply_webhook_configurations;
use resource_limiter::webhooks::{Codecs, WebhookState};
use resource_limiter::{OperatorConfig, run_admission_server, run_controller, run_conversion_server};

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("resource_limiter=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting resource-limiter");

    let config = OperatorConfig::from_env()?;
    info!(
        served_version = %config.served_version,
        concurrency = config.concurrency,
        health_port = config.health_port,
        "Configuration loaded"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());

    // Probes should answer before the controller is up
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let controller_handle = {
        let health_state = Some(health_state.clone());
        let client = client.clone();
        let concurrency = config.concurrency;
        let instance = config.instance.clone();
        match config.served_version {
            SchemaVersion::V1beta1 => tokio::spawn(run_controller::<v1beta1::ResourceLimiter>(
                client,
                concurrency,
                instance,
                health_state,
            )),
            SchemaVersion::V1beta2 => tokio::spawn(run_controller::<v1beta2::ResourceLimiter>(
                client,
                concurrency,
                instance,
                health_state,
            )),
        }
    };

    let webhook_handle = if config.has_webhook_certs() {
        info!("TLS certificates found, starting webhook servers");

        if let Some(target) = config.webhook_target() {
            match apply_webhook_configurations(&client, &target).await {
                Ok(()) => info!(service = %target.service, "Registered webhook configurations"),
                Err(e) => warn!("Failed to register webhook configurations: {}", e),
            }
        }

        let state = Arc::new(WebhookState::new(
            Arc::new(Codecs::new()),
            Some(health_state.clone()),
        ));
        let admission = {
            let state = state.clone();
            let (cert, key) = (config.webhook_cert.clone(), config.webhook_key.clone());
            let port = config.webhook_port;
            tokio::spawn(async move { run_admission_server(state, port, &cert, &key).await })
        };
        let conversion = {
            let (cert, key) = (config.webhook_cert.clone(), config.webhook_key.clone());
            let port = config.conversion_port;
            tokio::spawn(async move { run_conversion_server(state, port, &cert, &key).await })
        };
        Some(async move {
            tokio::select! {
                result = admission => ("admission", result),
                result = conversion => ("conversion", result),
            }
        })
    } else {
        info!("Webhook certificates not found, webhook servers disabled");
        None
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        (server, result) = async {
            match webhook_handle {
                Some(servers) => servers.await,
                None => std::future::pending().await,
            }
        } => {
            match result {
                Ok(Ok(())) => warn!(server, "Webhook server stopped"),
                Ok(Err(e)) => error!(server, "Webhook server error: {}", e),
                Err(e) => error!(server, "Webhook server task panicked: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
