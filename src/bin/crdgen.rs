//! Print the ResourceLimiter CRD as YAML.
//!
//! The conversion webhook points at `RL_WEBHOOK_SERVICE` in
//! `RL_WEBHOOK_NAMESPACE` (defaults: `resource-limiter` in `default`). The CA
//! bundle is embedded only when `RL_WEBHOOK_CA_BUNDLE` is set; otherwise it is
//! left for a CA injector to fill in.

use resource_limiter::OperatorConfig;
use resource_limiter::crd::merged_crd;
use resource_limiter::resources::webhook_config::WebhookTarget;

const DEFAULT_SERVICE: &str = "resource-limiter";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::from_env()?;
    let target = config.webhook_target().unwrap_or_else(|| WebhookTarget {
        service: config
            .webhook_service
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
        namespace: config.webhook_namespace.clone(),
        ca_bundle: Vec::new(),
        admission_port: config.webhook_port,
        conversion_port: config.conversion_port,
    });

    let mut client_config = target.conversion_client_config();
    if target.ca_bundle.is_empty() {
        client_config.ca_bundle = None;
    }

    let crd = merged_crd(Some(client_config))?;
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
