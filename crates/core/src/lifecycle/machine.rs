use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::intent::{IntentId, IntentStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentEvent {
    GuardrailCleared,
    UserApproved,
    UserRejected,
    WindowElapsed,
}

/// Compare-and-swap request handed to storage: move `intent_id` from
/// `expected` to `to`, stamping the matching timestamp column with `at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub intent_id: IntentId,
    pub expected: IntentStatus,
    pub to: IntentStatus,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn sets_approved_at(&self) -> bool {
        self.to == IntentStatus::Approved
    }

    /// `expired` shares the rejection timestamp column.
    pub fn sets_rejected_at(&self) -> bool {
        matches!(self.to, IntentStatus::Rejected | IntentStatus::Expired)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntentTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: IntentStatus, event: IntentEvent },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntentStateMachine;

impl IntentStateMachine {
    pub fn initial_state(&self) -> IntentStatus {
        IntentStatus::Pending
    }

    pub fn apply(
        &self,
        intent_id: &IntentId,
        current: IntentStatus,
        event: IntentEvent,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, IntentTransitionError> {
        use IntentEvent::{GuardrailCleared, UserApproved, UserRejected, WindowElapsed};
        use IntentStatus::{Approved, Expired, Pending, Rejected};

        let to = match (current, event) {
            (Pending, GuardrailCleared) | (Pending, UserApproved) => Approved,
            (Pending, UserRejected) => Rejected,
            (Pending, WindowElapsed) => Expired,
            (state, event) => {
                return Err(IntentTransitionError::InvalidTransition { state, event });
            }
        };

        Ok(StatusChange { intent_id: intent_id.clone(), expected: current, to, at })
    }

    /// Plans the change, recording a `transition_rejected` event when the
    /// event is not allowed. Nothing is recorded on success: storage may
    /// still refuse the swap, so callers invoke [`Self::record_applied`]
    /// once it commits.
    pub fn apply_with_audit<S>(
        &self,
        intent_id: &IntentId,
        current: IntentStatus,
        event: IntentEvent,
        at: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<StatusChange, IntentTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(intent_id, current, event, at);
        if let Err(error) = &result {
            sink.emit(
                AuditEvent::new(
                    audit,
                    "lifecycle.transition_rejected",
                    AuditCategory::Lifecycle,
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
            );
        }
        result
    }

    pub fn record_applied<S>(&self, change: &StatusChange, event: IntentEvent, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            AuditEvent::new(audit, "lifecycle.transition_applied", AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("from", change.expected.as_str())
                .with_metadata("to", change.to.as_str())
                .with_metadata("event", format!("{event:?}")),
        );
    }

    /// Storage refused the swap because the intent had already moved.
    pub fn record_lost<S>(&self, change: &StatusChange, event: IntentEvent, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            AuditEvent::new(audit, "lifecycle.transition_lost", AuditCategory::Lifecycle, AuditOutcome::Rejected)
                .with_metadata("expected", change.expected.as_str())
                .with_metadata("to", change.to.as_str())
                .with_metadata("event", format!("{event:?}")),
        );
    }
}
