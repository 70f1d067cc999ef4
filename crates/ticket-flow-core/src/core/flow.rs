// crates/ticket-flow-core/src/core/flow.rs
// ============================================================================
// Module: Flow Records
// Description: Persisted flow state: kind, status, payload, handle and hooks.
// Purpose: Describe one ordered execution step of a ticket.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`FlowRecord`] is one step of a ticket. It caches a derived summary of
//! whatever backs it (an engine pipeline, an approval, or nothing) and owns
//! the payload the step runs with. The engine stays the source of truth for
//! sub-state; the record only holds the root handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::FlowError;
use crate::core::identifiers::CallbackId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::ProcedureId;
use crate::core::identifiers::RootHandle;
use crate::core::identifiers::TicketId;
use crate::core::status::FlowStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Flow Kind
// ============================================================================

/// Closed set of flow variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Submits a pipeline and waits for the engine to finish it.
    Dag,
    /// Submits a pipeline and succeeds once submission is accepted.
    FireAndForget,
    /// Submits a pipeline; engine failure is recorded but counted as success.
    BestEffort,
    /// Waits for an explicit approve or reject. Never touches the engine.
    Pause,
    /// Acquires exclusivity on its resources and succeeds inline.
    Reservation,
}

impl FlowKind {
    /// Returns true when the kind submits a pipeline to the engine.
    #[must_use]
    pub const fn uses_engine(self) -> bool {
        matches!(self, Self::Dag | Self::FireAndForget | Self::BestEffort)
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dag => "dag",
            Self::FireAndForget => "fire_and_forget",
            Self::BestEffort => "best_effort",
            Self::Pause => "pause",
            Self::Reservation => "reservation",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Retry policy for execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Only operators retry.
    #[default]
    Manual,
    /// The reconciler retries until `max_attempts` runs have been made.
    Automatic {
        /// Maximum number of runs, including the first.
        max_attempts: u32,
    },
}

// ============================================================================
// SECTION: Callbacks And Approval
// ============================================================================

/// Hook tags attached to a flow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallbackRefs {
    /// Runs right before submission; may rewrite this flow's payload.
    pub pre: Option<CallbackId>,
    /// Runs once on the success transition; may rewrite the next flow's payload.
    pub post: Option<CallbackId>,
}

/// Decision recorded on a pause flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// The actor let the ticket continue.
    Approved,
    /// The actor stopped the ticket.
    Rejected,
}

/// Approval record stored on a pause flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Actor that decided.
    pub actor: String,
    /// Decision taken.
    pub decision: ApprovalDecision,
    /// Decision time.
    pub decided_at: Timestamp,
}

// ============================================================================
// SECTION: Flow Record
// ============================================================================

/// Flow definition before the store assigns identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDraft {
    /// Display name from the ticket template.
    pub name: String,
    /// Flow variant.
    pub kind: FlowKind,
    /// Business procedure for engine-backed and reservation kinds.
    pub procedure: Option<ProcedureId>,
    /// Retry policy for execution failures.
    pub retry_policy: RetryPolicy,
    /// Payload built by the flow param builder.
    pub payload: Value,
    /// Hook tags.
    pub callbacks: CallbackRefs,
}

/// Persisted flow state.
///
/// # Invariants
/// - `handle` is set only after the first accepted submission.
/// - `error` is `Some` exactly when `status` is `Failed`.
/// - `post_callback_fired` flips to true in the same save as the success transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Flow identifier.
    pub id: FlowId,
    /// Owning ticket.
    pub ticket_id: TicketId,
    /// Zero-based position inside the ticket.
    pub position: u32,
    /// Display name from the ticket template.
    pub name: String,
    /// Flow variant.
    pub kind: FlowKind,
    /// Business procedure for engine-backed and reservation kinds.
    pub procedure: Option<ProcedureId>,
    /// Cached status.
    pub status: FlowStatus,
    /// Retry policy for execution failures.
    pub retry_policy: RetryPolicy,
    /// Number of runs that claimed their resources and started.
    pub attempts: u32,
    /// Failure details while failed.
    pub error: Option<FlowError>,
    /// Engine root handle.
    pub handle: Option<RootHandle>,
    /// Payload snapshot this flow runs with.
    pub payload: Value,
    /// Hook tags.
    pub callbacks: CallbackRefs,
    /// Whether the post-callback already ran for the success transition.
    pub post_callback_fired: bool,
    /// Human-readable note, e.g. an ignored best-effort failure.
    pub summary: Option<String>,
    /// Approval decision for pause flows.
    pub approval: Option<Approval>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time of the last persisted change.
    pub updated_at: Timestamp,
}

impl FlowRecord {
    /// Builds a pending flow record from a draft.
    #[must_use]
    pub fn from_draft(
        id: FlowId,
        ticket_id: TicketId,
        position: u32,
        draft: FlowDraft,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            ticket_id,
            position,
            name: draft.name,
            kind: draft.kind,
            procedure: draft.procedure,
            status: FlowStatus::Pending,
            retry_policy: draft.retry_policy,
            attempts: 0,
            error: None,
            handle: None,
            payload: draft.payload,
            callbacks: draft.callbacks,
            post_callback_fired: false,
            summary: None,
            approval: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a failure and moves the flow to `Failed`.
    pub fn fail(&mut self, error: FlowError, now: Timestamp) {
        self.status = FlowStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Moves the flow to a new status, clearing the error unless failed.
    pub fn transition(&mut self, status: FlowStatus, now: Timestamp) {
        if status != FlowStatus::Failed {
            self.error = None;
        }
        self.status = status;
        self.updated_at = now;
    }

    /// Returns true when the failure may be retried by the reconciler.
    #[must_use]
    pub fn is_auto_retryable(&self) -> bool {
        self.status == FlowStatus::Failed
            && self
                .error
                .as_ref()
                .is_some_and(|error| error.code.is_auto_retryable(self.retry_policy, self.attempts))
    }
}
