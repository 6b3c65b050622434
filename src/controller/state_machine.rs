//! Lifecycle state machine for `ResourceLimiter`.
//!
//! The published `status.state` is derived from the phase the reconciler
//! lands in. Transitions are checked against an explicit table so that an
//! unexpected jump (for example out of `Terminating`) shows up in the logs.

use std::fmt;

use kube::ResourceExt;

use crate::controller::common::FINALIZER;
use crate::controller::limiter::Limiter;
use crate::crd::LimiterState;

/// Lifecycle phase of a limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterPhase {
    /// Finalizer not yet attached or nothing published yet
    Initializing,
    /// Quotas are enforced
    Applying,
    /// Quotas are withdrawn
    Stopping,
    /// Deletion requested, cleanup in progress
    Terminating,
    /// Cleanup finished and the finalizer released
    Removed,
}

impl LimiterPhase {
    /// Phase the object was last observed in, from its finalizers and published status.
    pub fn observed<L: Limiter>(limiter: &L) -> Self {
        if !limiter.finalizers().iter().any(|f| f == FINALIZER) {
            return match limiter.status().and_then(|s| s.state) {
                Some(LimiterState::Terminating) => LimiterPhase::Terminating,
                _ => LimiterPhase::Initializing,
            };
        }
        match limiter.status().and_then(|s| s.state) {
            Some(LimiterState::Ready) => LimiterPhase::Applying,
            Some(LimiterState::Stopped) => LimiterPhase::Stopping,
            Some(LimiterState::Terminating) => LimiterPhase::Terminating,
            None => LimiterPhase::Initializing,
        }
    }

    /// State published for this phase, if any.
    pub fn published_state(&self) -> Option<LimiterState> {
        match self {
            LimiterPhase::Initializing | LimiterPhase::Removed => None,
            LimiterPhase::Applying => Some(LimiterState::Ready),
            LimiterPhase::Stopping => Some(LimiterState::Stopped),
            LimiterPhase::Terminating => Some(LimiterState::Terminating),
        }
    }
}

impl fmt::Display for LimiterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterPhase::Initializing => write!(f, "Initializing"),
            LimiterPhase::Applying => write!(f, "Applying"),
            LimiterPhase::Stopping => write!(f, "Stopping"),
            LimiterPhase::Terminating => write!(f, "Terminating"),
            LimiterPhase::Removed => write!(f, "Removed"),
        }
    }
}

/// Events that drive the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterEvent {
    /// `spec.applied` is true
    QuotasApplied,
    /// `spec.applied` is false
    QuotasWithdrawn,
    /// Deletion timestamp has been set
    DeletionRequested,
    /// Every managed quota is gone
    CleanupComplete,
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::QuotasApplied => write!(f, "QuotasApplied"),
            LimiterEvent::QuotasWithdrawn => write!(f, "QuotasWithdrawn"),
            LimiterEvent::DeletionRequested => write!(f, "DeletionRequested"),
            LimiterEvent::CleanupComplete => write!(f, "CleanupComplete"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LimiterPhase,
    pub to: LimiterPhase,
    pub event: LimiterEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LimiterPhase,
        to: LimiterPhase,
        event: LimiterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: LimiterPhase,
        to: LimiterPhase,
        event: LimiterEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: LimiterPhase,
        event: LimiterEvent,
    },
}

/// Transition table for the limiter lifecycle
pub struct LimiterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LimiterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LimiterStateMachine {
    pub fn new() -> Self {
        use LimiterEvent::*;
        use LimiterPhase::*;
        Self {
            transitions: vec![
                Transition::new(Initializing, Applying, QuotasApplied, "Quotas enforced"),
                Transition::new(Initializing, Stopping, QuotasWithdrawn, "Created stopped"),
                Transition::new(
                    Initializing,
                    Terminating,
                    DeletionRequested,
                    "Deleted before first pass",
                ),
                Transition::new(Applying, Applying, QuotasApplied, "Quotas resynced"),
                Transition::new(Applying, Stopping, QuotasWithdrawn, "Quotas withdrawn"),
                Transition::new(Applying, Terminating, DeletionRequested, "Deletion requested"),
                Transition::new(Stopping, Applying, QuotasApplied, "Quotas re-enabled"),
                Transition::new(Stopping, Stopping, QuotasWithdrawn, "Still stopped"),
                Transition::new(Stopping, Terminating, DeletionRequested, "Deletion requested"),
                Transition::new(Terminating, Terminating, DeletionRequested, "Cleanup retried"),
                Transition::new(Terminating, Removed, CleanupComplete, "Finalizer released"),
            ],
        }
    }

    /// Attempt a transition from `current` on `event`
    pub fn transition(&self, current: &LimiterPhase, event: LimiterEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    pub fn can_transition(&self, from: &LimiterPhase, event: &LimiterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &LimiterPhase) -> Vec<&LimiterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }
}

/// Event implied by the declared spec and metadata of `limiter`.
pub fn determine_event<L: Limiter>(limiter: &L) -> LimiterEvent {
    if limiter.meta().deletion_timestamp.is_some() {
        LimiterEvent::DeletionRequested
    } else if limiter.applied() {
        LimiterEvent::QuotasApplied
    } else {
        LimiterEvent::QuotasWithdrawn
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;
    use crate::crd::ResourceLimiterStatus;
    use crate::crd::v1beta2::{ResourceLimiter, ResourceLimiterSpec};

    fn limiter(applied: bool, state: Option<LimiterState>, finalized: bool) -> ResourceLimiter {
        let mut rl = ResourceLimiter::new(
            "limiter",
            ResourceLimiterSpec {
                quotas: vec![],
                applied,
            },
        );
        if finalized {
            rl.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        rl.status = state.map(|state| ResourceLimiterStatus {
            state: Some(state),
            ..Default::default()
        });
        rl
    }

    #[test]
    fn test_initializing_to_applying() {
        let sm = LimiterStateMachine::new();
        match sm.transition(&LimiterPhase::Initializing, LimiterEvent::QuotasApplied) {
            TransitionResult::Success { to, .. } => assert_eq!(to, LimiterPhase::Applying),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stop_and_restart() {
        let sm = LimiterStateMachine::new();
        assert!(sm.can_transition(&LimiterPhase::Applying, &LimiterEvent::QuotasWithdrawn));
        assert!(sm.can_transition(&LimiterPhase::Stopping, &LimiterEvent::QuotasApplied));
    }

    #[test]
    fn test_terminating_only_finishes() {
        let sm = LimiterStateMachine::new();
        let result = sm.transition(&LimiterPhase::Terminating, LimiterEvent::QuotasApplied);
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
        assert!(sm.can_transition(&LimiterPhase::Terminating, &LimiterEvent::CleanupComplete));
        assert!(sm.valid_events(&LimiterPhase::Removed).is_empty());
    }

    #[test]
    fn test_deletion_from_any_live_phase() {
        let sm = LimiterStateMachine::new();
        for phase in [
            LimiterPhase::Initializing,
            LimiterPhase::Applying,
            LimiterPhase::Stopping,
            LimiterPhase::Terminating,
        ] {
            assert!(
                sm.can_transition(&phase, &LimiterEvent::DeletionRequested),
                "{phase} should accept deletion"
            );
        }
    }

    #[test]
    fn test_observed_phase() {
        assert_eq!(
            LimiterPhase::observed(&limiter(true, Some(LimiterState::Ready), false)),
            LimiterPhase::Initializing
        );
        assert_eq!(
            LimiterPhase::observed(&limiter(true, Some(LimiterState::Ready), true)),
            LimiterPhase::Applying
        );
        assert_eq!(
            LimiterPhase::observed(&limiter(false, Some(LimiterState::Stopped), true)),
            LimiterPhase::Stopping
        );
        assert_eq!(
            LimiterPhase::observed(&limiter(true, None, true)),
            LimiterPhase::Initializing
        );
    }

    #[test]
    fn test_determine_event() {
        assert_eq!(
            determine_event(&limiter(true, None, true)),
            LimiterEvent::QuotasApplied
        );
        assert_eq!(
            determine_event(&limiter(false, None, true)),
            LimiterEvent::QuotasWithdrawn
        );
        let mut deleted = limiter(true, None, true);
        deleted.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::DateTime::UNIX_EPOCH));
        assert_eq!(determine_event(&deleted), LimiterEvent::DeletionRequested);
    }

    #[test]
    fn test_published_state() {
        assert_eq!(
            LimiterPhase::Applying.published_state(),
            Some(LimiterState::Ready)
        );
        assert_eq!(LimiterPhase::Removed.published_state(), None);
    }
}
