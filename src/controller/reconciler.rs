//! Reconciliation loop for ResourceLimiter.
//!
//! [`reconcile_limiter`] runs one pass of the algorithm against any
//! [`ClusterStore`]. [`reconcile`] and [`error_policy`] adapt it to the
//! kube-runtime controller: events, metrics and requeue decisions live there.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Namespace;
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, info, warn};

use crate::controller::common::{FINALIZER, with_finalizer, without_finalizer};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::limiter::{Limiter, QuotaTarget};
use crate::controller::state_machine::{
    LimiterEvent, LimiterPhase, LimiterStateMachine, TransitionResult, determine_event,
};
use crate::controller::store::{ClusterStore, KubeStore};
use crate::crd::{LimiterState, NamespaceQuotaStatus, ResourceLimiterStatus};
use crate::resources::quota::{generate_resource_quota, quota_status, updated_resource_quota};
use crate::resources::webhook_config::NAMESPACE_LABELS;

/// Periodic resync of converged objects, refreshing observed usage.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// What a single pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The object no longer exists.
    Absent,
    /// Quotas converged and the status reflects them.
    Converged {
        phase: LimiterPhase,
        quotas: usize,
        status_changed: bool,
    },
    /// Cleanup ran and the finalizer was released.
    Removed { quotas_deleted: usize },
}

/// Run one reconcile pass for the limiter called `name`.
pub async fn reconcile_limiter<L, S>(store: &S, name: &str) -> Result<PassOutcome>
where
    L: Limiter,
    S: ClusterStore<L>,
{
    let Some(mut limiter) = store.get_limiter(name).await? else {
        debug!(name = %name, "ResourceLimiter not found");
        return Ok(PassOutcome::Absent);
    };

    let state_machine = LimiterStateMachine::new();
    let from = LimiterPhase::observed(&limiter);
    let event = determine_event(&limiter);
    let to = next_phase(&state_machine, name, from, event);

    if event == LimiterEvent::DeletionRequested {
        return cleanup(store, limiter, &state_machine).await;
    }

    if let Some(finalizers) = with_finalizer(&limiter, FINALIZER) {
        info!(name = %name, "Adding finalizer");
        limiter = store.patch_finalizers(&limiter, finalizers).await?;
    }

    let quotas = if limiter.applied() {
        apply_quotas(store, &limiter).await?
    } else {
        withdraw_quotas(store, &limiter).await?;
        BTreeMap::new()
    };
    prune_stale_quotas(store, &limiter, &quotas).await?;

    let count = quotas.len();
    let computed = ResourceLimiterStatus {
        state: to.published_state(),
        quotas,
    };
    let status_changed = limiter.status() != Some(&computed);
    if status_changed {
        let mut updated = limiter.clone();
        *updated.status_mut() = Some(computed);
        store.replace_status(&updated).await?;
        debug!(name = %name, phase = %to, "Status replaced");
    }

    Ok(PassOutcome::Converged {
        phase: to,
        quotas: count,
        status_changed,
    })
}

fn next_phase(
    state_machine: &LimiterStateMachine,
    name: &str,
    from: LimiterPhase,
    event: LimiterEvent,
) -> LimiterPhase {
    match state_machine.transition(&from, event) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => {
            if from != to {
                info!(name = %name, from = %from, to = %to, event = %event, "{description}");
            }
            to
        }
        TransitionResult::InvalidTransition { current, event } => {
            warn!(name = %name, current = %current, event = %event, "Unexpected lifecycle transition");
            match event {
                LimiterEvent::QuotasApplied => LimiterPhase::Applying,
                LimiterEvent::QuotasWithdrawn => LimiterPhase::Stopping,
                LimiterEvent::DeletionRequested => LimiterPhase::Terminating,
                LimiterEvent::CleanupComplete => LimiterPhase::Removed,
            }
        }
    }
}

async fn apply_quotas<L, S>(
    store: &S,
    limiter: &L,
) -> Result<BTreeMap<String, NamespaceQuotaStatus>>
where
    L: Limiter,
    S: ClusterStore<L>,
{
    let desired = limiter.desired_quotas()?;
    let owner = limiter
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingField("metadata.uid".to_string()))?;

    let mut statuses = BTreeMap::new();
    for quota in &desired {
        let QuotaTarget { name, namespace } = &quota.target;
        let ns = store
            .get_namespace(namespace)
            .await?
            .ok_or_else(|| Error::NamespaceNotFound(namespace.clone()))?;

        let status = match store.get_quota(namespace, name).await? {
            None => {
                let created = generate_resource_quota(name, namespace, &quota.limits, owner.clone());
                store.create_quota(&created).await?;
                info!(quota = %name, namespace = %namespace, "Created ResourceQuota");
                quota_status(namespace, &quota.limits, None)
            }
            Some(existing) => {
                if let Some(updated) = updated_resource_quota(&existing, &quota.limits, &owner) {
                    store.replace_quota(&updated).await?;
                    info!(quota = %name, namespace = %namespace, "Updated ResourceQuota");
                }
                quota_status(namespace, &quota.limits, Some(&existing))
            }
        };
        statuses.insert(name.clone(), status);

        if limiter.labels_namespaces() && !has_webhook_labels(&ns) {
            let labels = NAMESPACE_LABELS
                .iter()
                .map(|(k, v)| ((*k).to_string(), Some((*v).to_string())))
                .collect();
            store.patch_namespace_labels(namespace, &labels).await?;
            debug!(namespace = %namespace, "Labelled namespace for admission webhooks");
        }
    }
    Ok(statuses)
}

async fn withdraw_quotas<L, S>(store: &S, limiter: &L) -> Result<usize>
where
    L: Limiter,
    S: ClusterStore<L>,
{
    let mut deleted = 0;
    for QuotaTarget { name, namespace } in limiter.quota_targets() {
        if store.delete_quota(&namespace, &name).await? {
            info!(quota = %name, namespace = %namespace, "Deleted ResourceQuota");
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Delete quotas recorded in the stored status that this pass no longer manages.
async fn prune_stale_quotas<L, S>(
    store: &S,
    limiter: &L,
    current: &BTreeMap<String, NamespaceQuotaStatus>,
) -> Result<()>
where
    L: Limiter,
    S: ClusterStore<L>,
{
    let targeted: BTreeSet<String> = limiter.quota_targets().into_iter().map(|t| t.name).collect();
    let Some(status) = limiter.status() else {
        return Ok(());
    };
    for (name, recorded) in &status.quotas {
        if current.contains_key(name) || targeted.contains(name) {
            continue;
        }
        if store.delete_quota(&recorded.namespace, name).await? {
            info!(quota = %name, namespace = %recorded.namespace, "Pruned stale ResourceQuota");
        }
    }
    Ok(())
}

async fn cleanup<L, S>(
    store: &S,
    mut limiter: L,
    state_machine: &LimiterStateMachine,
) -> Result<PassOutcome>
where
    L: Limiter,
    S: ClusterStore<L>,
{
    let name = limiter.name_any();
    if !limiter.finalizers().iter().any(|f| f == FINALIZER) {
        debug!(name = %name, "Deletion in progress without finalizer");
        return Ok(PassOutcome::Removed { quotas_deleted: 0 });
    }

    if limiter.status().and_then(|s| s.state) != Some(LimiterState::Terminating) {
        let mut updated = limiter.clone();
        updated
            .status_mut()
            .get_or_insert_with(Default::default)
            .state = Some(LimiterState::Terminating);
        limiter = store.replace_status(&updated).await?;
    }

    let mut targets = limiter.quota_targets();
    if let Some(status) = limiter.status() {
        for (quota, recorded) in &status.quotas {
            if !targets.iter().any(|t| &t.name == quota) {
                targets.push(QuotaTarget {
                    name: quota.clone(),
                    namespace: recorded.namespace.clone(),
                });
            }
        }
    }

    let mut quotas_deleted = 0;
    for QuotaTarget { name: quota, namespace } in &targets {
        if store.delete_quota(namespace, quota).await? {
            info!(quota = %quota, namespace = %namespace, "Deleted ResourceQuota");
            quotas_deleted += 1;
        }
    }

    if limiter.labels_namespaces() {
        let removal: BTreeMap<String, Option<String>> = NAMESPACE_LABELS
            .iter()
            .map(|(k, _)| ((*k).to_string(), None))
            .collect();
        let namespaces: BTreeSet<&str> = targets.iter().map(|t| t.namespace.as_str()).collect();
        for namespace in namespaces {
            match store.get_namespace(namespace).await? {
                Some(ns) if has_any_webhook_label(&ns) => {
                    store.patch_namespace_labels(namespace, &removal).await?;
                    debug!(namespace = %namespace, "Removed admission webhook labels");
                }
                _ => {}
            }
        }
    }

    if let Some(finalizers) = without_finalizer(&limiter, FINALIZER) {
        store.patch_finalizers(&limiter, finalizers).await?;
    }
    next_phase(
        state_machine,
        &name,
        LimiterPhase::Terminating,
        LimiterEvent::CleanupComplete,
    );

    Ok(PassOutcome::Removed { quotas_deleted })
}

fn has_webhook_labels(ns: &Namespace) -> bool {
    let labels = ns.labels();
    NAMESPACE_LABELS
        .iter()
        .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
}

fn has_any_webhook_label(ns: &Namespace) -> bool {
    let labels = ns.labels();
    NAMESPACE_LABELS.iter().any(|(k, _)| labels.contains_key(*k))
}

/// Reconcile a ResourceLimiter of the served version `L`.
pub async fn reconcile<L: Limiter>(obj: Arc<L>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    debug!(name = %name, version = %L::VERSION, "Reconciling ResourceLimiter");

    let store = KubeStore::<L>::new(ctx.client.clone());
    let outcome = match reconcile_limiter(&store, &name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, Error::NamespaceNotFound(_) | Error::InvalidQuantity(_)) {
                ctx.publish_warning_event(obj.as_ref(), e.reason(), "Reconciling", Some(e.to_string()))
                    .await;
            }
            return Err(e);
        }
    };
    ctx.reset_backoff(&name);

    match outcome {
        PassOutcome::Absent => {
            if let Some(ref health_state) = ctx.health_state {
                health_state.metrics.forget_limiter(&name);
            }
            Ok(Action::await_change())
        }
        PassOutcome::Converged {
            phase,
            quotas,
            status_changed,
        } => {
            if status_changed {
                let (reason, note) = match phase {
                    LimiterPhase::Stopping => ("QuotasStopped", "Managed quotas removed".to_string()),
                    _ => ("QuotasApplied", format!("{quotas} quota(s) enforced")),
                };
                ctx.publish_normal_event(obj.as_ref(), reason, "Reconciling", Some(note))
                    .await;
            }
            if let Some(ref health_state) = ctx.health_state {
                health_state.metrics.record_reconcile(
                    &name,
                    start_time.elapsed().as_secs_f64(),
                    quotas,
                );
                health_state.touch();
            }
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        PassOutcome::Removed { quotas_deleted } => {
            info!(name = %name, quotas_deleted, "Cleanup complete");
            ctx.publish_normal_event(
                obj.as_ref(),
                "CleanupComplete",
                "Deleting",
                Some(format!("{quotas_deleted} quota(s) deleted")),
            )
            .await;
            if let Some(ref health_state) = ctx.health_state {
                health_state.metrics.forget_limiter(&name);
            }
            Ok(Action::await_change())
        }
    }
}

/// Error policy for the controller: requeue with per-object exponential backoff.
pub fn error_policy<L: Limiter>(obj: Arc<L>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name, error.reason());
    }

    let delay = ctx.backoff(&name);
    if error.is_conflict() {
        debug!(name = %name, delay = ?delay, "Conflict, retrying with fresh copy");
    } else {
        warn!(name = %name, error = %error, delay = ?delay, "Reconcile failed, will retry");
    }
    Action::requeue(delay)
}
