//! Watch-based waiting for limiters, quotas and namespaces.

use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use resource_limiter::crd::LimiterState;
use resource_limiter::crd::v1beta2::ResourceLimiter;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("gave up after {0:?}")]
    Timeout(Duration),

    #[error("{0} was deleted while waiting")]
    Deleted(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("watch failed: {0}")]
    Watch(#[from] watcher::Error),

    #[error("watch stream ended")]
    StreamEnded,
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

/// Wait until the object called `name` satisfies `condition`.
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    limit: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    K::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let watch = async {
        if let Some(current) = api.get_opt(name).await?
            && condition(&current)
        {
            return Ok(current);
        }

        let mut events = watcher::watcher(api.clone(), by_name(name)).boxed();
        while let Some(event) = events.next().await {
            match event? {
                Event::Apply(obj) | Event::InitApply(obj) if condition(&obj) => return Ok(obj),
                Event::Delete(_) => return Err(WaitError::Deleted(name.to_string())),
                _ => {}
            }
        }
        Err(WaitError::StreamEnded)
    };

    timeout(limit, watch)
        .await
        .map_err(|_| WaitError::Timeout(limit))?
}

/// Wait until the object called `name` no longer exists.
pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    K::DynamicType: Default,
{
    let watch = async {
        if api.get_opt(name).await?.is_none() {
            return Ok(());
        }

        let mut events = watcher::watcher(api.clone(), by_name(name)).boxed();
        while let Some(event) = events.next().await {
            if let Event::Delete(_) = event? {
                return Ok(());
            }
        }
        Err(WaitError::StreamEnded)
    };

    timeout(limit, watch)
        .await
        .map_err(|_| WaitError::Timeout(limit))?
}

/// Wait until the limiter publishes `state`.
pub async fn wait_for_state(
    api: &Api<ResourceLimiter>,
    name: &str,
    state: LimiterState,
    limit: Duration,
) -> Result<ResourceLimiter, WaitError> {
    wait_for_condition(
        api,
        name,
        |rl| rl.status.as_ref().and_then(|s| s.state) == Some(state),
        limit,
    )
    .await
}
