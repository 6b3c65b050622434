//! Shared context for the controller.
//!
//! Holds the Kubernetes client, the event reporter identity, the optional
//! health state and the per-object retry counters used for backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use crate::controller::limiter::Limiter;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "resource-limiter";

/// First retry delay after a failed pass
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound of the retry delay
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    retries: Arc<RetryTracker>,
}

impl Context {
    /// Create a new context. `instance` identifies this replica in events.
    pub fn new(
        client: Client,
        instance: Option<String>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
            health_state,
            retries: Arc::new(RetryTracker::default()),
        }
    }

    /// Record a failed pass for `name` and return the delay before the next one.
    pub fn backoff(&self, name: &str) -> Duration {
        backoff_delay(self.retries.record_failure(name))
    }

    /// Forget the failures recorded for `name`.
    pub fn reset_backoff(&self, name: &str) {
        self.retries.reset(name);
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish<L: Limiter>(
        &self,
        resource: &L,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a limiter
    pub async fn publish_normal_event<L: Limiter>(
        &self,
        resource: &L,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a limiter
    pub async fn publish_warning_event<L: Limiter>(
        &self,
        resource: &L,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}

/// Consecutive failed passes per object.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    /// Count a failure for `name` and return the number of consecutive failures.
    pub fn record_failure(&self, name: &str) -> u32 {
        match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(name.to_string()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
            Err(_) => 1,
        }
    }

    pub fn reset(&self, name: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(name);
        }
    }
}

/// Exponential backoff: `BACKOFF_BASE * 2^(attempt-1)`, capped at `BACKOFF_MAX`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(BACKOFF_MAX)
}
